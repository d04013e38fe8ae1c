//! Per-next-hop probe bookkeeping and the task that drives it.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use swagent_state::NextHop;
use swagent_types::{InterfaceId, IpAddress};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::monitor::ProbeCommand;

/// Sends a resolution request for one next hop.
pub trait NeighborProber: Send {
    fn probe(&mut self, next_hop: &NextHop);
}

/// Backoff state of one tracked next hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNexthopProbe {
    next_hop: NextHop,
    interval: Duration,
    next_due: Instant,
}

impl ResolvedNexthopProbe {
    /// A probe that fires on the first poll.
    fn new(next_hop: NextHop, start_interval: Duration, now: Instant) -> Self {
        Self {
            next_hop,
            interval: start_interval,
            next_due: now,
        }
    }

    pub fn next_hop(&self) -> &NextHop {
        &self.next_hop
    }

    /// Wait before the probe after the next one.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    fn is_due(&self, now: Instant) -> bool {
        self.next_due <= now
    }

    fn fire(&mut self, now: Instant, max_interval: Duration) {
        self.next_due = now + self.interval;
        self.interval = (self.interval * 2).min(max_interval);
    }
}

/// Reference-counted set of next hops to keep probing.
///
/// A probe exists exactly while at least one resolved route forwards
/// through its next hop. Keys always carry weight zero.
#[derive(Debug)]
pub struct ResolvedNexthopProbeScheduler {
    use_counts: BTreeMap<NextHop, u32>,
    probes: BTreeMap<NextHop, ResolvedNexthopProbe>,
    start_interval: Duration,
    max_interval: Duration,
}

impl ResolvedNexthopProbeScheduler {
    pub fn new(start_interval: Duration, max_interval: Duration) -> Self {
        Self {
            use_counts: BTreeMap::new(),
            probes: BTreeMap::new(),
            start_interval,
            max_interval: max_interval.max(start_interval),
        }
    }

    pub fn use_counts(&self) -> &BTreeMap<NextHop, u32> {
        &self.use_counts
    }

    pub fn probes(&self) -> &BTreeMap<NextHop, ResolvedNexthopProbe> {
        &self.probes
    }

    pub fn handle(&mut self, command: ProbeCommand, now: Instant) {
        match command {
            ProbeCommand::Changed { added, removed } => self.process_changed(&added, &removed, now),
            ProbeCommand::NeighborRemoved { ip, interface_id } => {
                self.neighbor_removed(ip, interface_id, now);
            }
        }
    }

    /// Applies one batch of reference changes; additions first.
    pub fn process_changed(&mut self, added: &[NextHop], removed: &[NextHop], now: Instant) {
        for nh in added {
            let key = nh.without_weight();
            let count = self.use_counts.entry(key).or_insert(0);
            *count += 1;
            if *count == 1 {
                debug!(next_hop = %key, "Start probing next hop");
                self.probes
                    .insert(key, ResolvedNexthopProbe::new(key, self.start_interval, now));
            }
        }
        for nh in removed {
            let key = nh.without_weight();
            match self.use_counts.get_mut(&key) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    debug!(next_hop = %key, "Stop probing next hop");
                    self.use_counts.remove(&key);
                    self.probes.remove(&key);
                }
                None => warn!(next_hop = %key, "Removing untracked next hop"),
            }
        }
    }

    /// Makes the probe for `ip` on `interface_id` due immediately.
    ///
    /// Returns `false` if no route forwards through that next hop.
    pub fn neighbor_removed(&mut self, ip: IpAddress, interface_id: InterfaceId, now: Instant) -> bool {
        let key = NextHop::resolved(ip, interface_id, 0);
        match self.probes.get_mut(&key) {
            Some(probe) => {
                debug!(next_hop = %key, "Neighbor removed, probing immediately");
                probe.next_due = now;
                probe.interval = self.start_interval;
                true
            }
            None => false,
        }
    }

    /// Next hops whose probe is due at `now`; each is rescheduled.
    pub fn due_probes(&mut self, now: Instant) -> Vec<NextHop> {
        let max_interval = self.max_interval;
        self.probes
            .values_mut()
            .filter(|probe| probe.is_due(now))
            .map(|probe| {
                probe.fire(now, max_interval);
                probe.next_hop
            })
            .collect()
    }

    /// Consumes commands and fires due probes every `tick` until the
    /// command channel closes.
    pub async fn run<P: NeighborProber>(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ProbeCommand>,
        mut prober: P,
        tick: Duration,
    ) {
        info!(
            start_interval_ms = self.start_interval.as_millis() as u64,
            max_interval_ms = self.max_interval.as_millis() as u64,
            "Resolved next-hop probe scheduler started"
        );
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command, Instant::now()),
                    None => break,
                },
                _ = ticker.tick() => {
                    for nh in self.due_probes(Instant::now()) {
                        trace!(next_hop = %nh, "Probing next hop");
                        prober.probe(&nh);
                    }
                }
            }
        }
        info!("Resolved next-hop probe scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    fn nh(addr: &str, intf: u32, weight: u64) -> NextHop {
        NextHop::resolved(addr.parse().unwrap(), InterfaceId::new(intf), weight)
    }

    fn scheduler() -> ResolvedNexthopProbeScheduler {
        ResolvedNexthopProbeScheduler::new(Duration::from_secs(1), Duration::from_secs(4))
    }

    #[test]
    fn test_shared_next_hop_use_counts() {
        let mut sched = scheduler();
        let now = Instant::now();
        let shared = nh("fe80::22", 1, 0);
        let other = nh("fe80:55::22", 55, 0);

        // Two routes through the same next hop, with different weights.
        sched.process_changed(&[nh("fe80::22", 1, 3), other], &[], now);
        sched.process_changed(&[nh("fe80::22", 1, 1)], &[], now);
        assert_eq!(sched.use_counts().get(&shared), Some(&2));
        assert_eq!(sched.use_counts().get(&other), Some(&1));
        assert_eq!(sched.probes().len(), 2);

        sched.process_changed(&[], &[shared], now);
        assert_eq!(sched.use_counts().get(&shared), Some(&1));
        assert!(sched.probes().contains_key(&shared));

        sched.process_changed(&[], &[shared, other], now);
        assert!(sched.use_counts().is_empty());
        assert!(sched.probes().is_empty());
    }

    #[test]
    fn test_probe_backoff() {
        let mut sched = scheduler();
        let t0 = Instant::now();
        let hop = nh("10.0.0.22", 1, 0);
        sched.process_changed(&[hop], &[], t0);

        assert_eq!(sched.due_probes(t0), vec![hop]);
        assert!(sched.due_probes(t0 + Duration::from_millis(500)).is_empty());
        assert_eq!(sched.due_probes(t0 + Duration::from_secs(1)), vec![hop]);
        // 1s, then 2s, then capped at 4s.
        assert!(sched.due_probes(t0 + Duration::from_secs(2)).is_empty());
        assert_eq!(sched.due_probes(t0 + Duration::from_secs(3)), vec![hop]);
        assert_eq!(sched.probes()[&hop].interval(), Duration::from_secs(4));
        assert_eq!(sched.due_probes(t0 + Duration::from_secs(7)), vec![hop]);
        assert_eq!(sched.probes()[&hop].next_due(), t0 + Duration::from_secs(11));
    }

    #[test]
    fn test_neighbor_removed_probes_immediately() {
        let mut sched = scheduler();
        let t0 = Instant::now();
        let hop = nh("10.0.0.22", 1, 0);
        sched.process_changed(&[hop], &[], t0);
        sched.due_probes(t0);

        let soon = t0 + Duration::from_millis(200);
        assert!(sched.due_probes(soon).is_empty());
        assert!(sched.neighbor_removed("10.0.0.22".parse().unwrap(), InterfaceId::new(1), soon));
        assert_eq!(sched.due_probes(soon), vec![hop]);

        assert!(!sched.neighbor_removed("10.0.0.99".parse().unwrap(), InterfaceId::new(1), soon));
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<NextHop>>>);

    impl NeighborProber for Recorder {
        fn probe(&mut self, next_hop: &NextHop) {
            self.0.lock().unwrap().push(*next_hop);
        }
    }

    #[tokio::test]
    async fn test_run_probes_tracked_next_hops() {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Recorder::default();
        let task = tokio::spawn(scheduler().run(rx, recorder.clone(), Duration::from_millis(5)));

        let hop = nh("10.0.0.22", 1, 0);
        tx.send(ProbeCommand::Changed {
            added: vec![hop],
            removed: vec![],
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(tx);
        task.await.unwrap();

        let probed = recorder.0.lock().unwrap().clone();
        assert!(!probed.is_empty());
        assert!(probed.iter().all(|probed| *probed == hop));
    }
}
