//! Discrete-event queue driving the medium.
//!
//! Events are ordered by `(time, insertion sequence)`, so events scheduled for
//! the same instant run in the order they were scheduled. Handlers never block;
//! they schedule follow-up events instead. There is no cancellation: handlers
//! recognise and ignore events that went stale in the meantime.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use super::error::Result;
use super::network::Network;
use super::pdp::Pdp;
use super::tx_mode::ModeId;
use super::types::{ArrivalId, Packet, PhyId, SimTime, TransducerId};

/// Closure run by the event loop with full access to the network.
pub type Callback = Box<dyn FnOnce(&mut Network) -> Result<()>>;

/// Everything that can happen on the medium.
pub enum Event {
    /// A propagated copy of a transmission reaches a transducer.
    Deliver {
        transducer: TransducerId,
        packet: Packet,
        rx_power_db: f64,
        mode: ModeId,
        pdp: Pdp,
    },
    /// An arrival's airtime is over; it stops interfering.
    RemoveArrival { transducer: TransducerId, arrival: ArrivalId },
    /// End of a transducer transmission. Stale when `generation` was superseded.
    TransducerTxEnd { transducer: TransducerId, generation: u64 },
    /// Tx-end trace of the PHY that started the transmission.
    TxEndTrace { phy: PhyId, packet: Packet },
    /// End of a PHY's own transmission. Stale when `generation` is not the PHY's latest.
    PhyTxEnd { phy: PhyId, generation: u64 },
    /// End of the reception of `arrival`. Stale when the PHY tracks something else.
    PhyRxEnd { phy: PhyId, arrival: ArrivalId },
    /// User-supplied action, used by traffic generators and tests.
    Callback(Callback),
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Deliver { transducer, packet, rx_power_db, mode, .. } => f
                .debug_struct("Deliver")
                .field("transducer", transducer)
                .field("packet", &packet.uid())
                .field("rx_power_db", rx_power_db)
                .field("mode", mode)
                .finish(),
            Event::RemoveArrival { transducer, arrival } => {
                f.debug_struct("RemoveArrival").field("transducer", transducer).field("arrival", arrival).finish()
            }
            Event::TransducerTxEnd { transducer, generation } => {
                f.debug_struct("TransducerTxEnd").field("transducer", transducer).field("generation", generation).finish()
            }
            Event::TxEndTrace { phy, packet } => f.debug_struct("TxEndTrace").field("phy", phy).field("packet", &packet.uid()).finish(),
            Event::PhyTxEnd { phy, generation } => f.debug_struct("PhyTxEnd").field("phy", phy).field("generation", generation).finish(),
            Event::PhyRxEnd { phy, arrival } => f.debug_struct("PhyRxEnd").field("phy", phy).field("arrival", arrival).finish(),
            Event::Callback(_) => f.write_str("Callback"),
        }
    }
}

struct Scheduled {
    time: SimTime,
    seq: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest time first, then FIFO)
        other.time.cmp(&self.time).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of pending events plus the virtual clock.
#[derive(Default)]
pub struct Scheduler {
    now: SimTime,
    queue: BinaryHeap<Scheduled>,
    next_seq: u64,
    processed: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `event` `delay` after the current time.
    pub fn schedule_after(&mut self, delay: SimTime, event: Event) {
        self.schedule_at(self.now + delay, event);
    }

    /// Schedule `event` at an absolute time; times in the past run at `now`.
    pub fn schedule_at(&mut self, time: SimTime, event: Event) {
        let time = time.max(self.now);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled { time, seq, event });
    }

    pub fn schedule_callback<F>(&mut self, delay: SimTime, callback: F)
    where
        F: FnOnce(&mut Network) -> Result<()> + 'static,
    {
        self.schedule_after(delay, Event::Callback(Box::new(callback)));
    }

    /// Time of the next pending event.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.queue.peek().map(|s| s.time)
    }

    /// Pop the next event and advance the clock to its time.
    pub fn pop(&mut self) -> Option<Event> {
        let scheduled = self.queue.pop()?;
        self.now = scheduled.time;
        self.processed += 1;
        Some(scheduled.event)
    }

    /// Move the clock forward without running anything. Never moves it backwards.
    pub(crate) fn advance_to(&mut self, time: SimTime) {
        self.now = self.now.max(time);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of events popped so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rx_end(phy: usize) -> Event {
        Event::PhyRxEnd { phy: PhyId(phy), arrival: ArrivalId(0) }
    }

    fn phy_of(event: Event) -> usize {
        match event {
            Event::PhyRxEnd { phy, .. } => phy.0,
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn pops_in_time_order() {
        let mut s = Scheduler::new();
        s.schedule_after(SimTime::from_millis(30), rx_end(3));
        s.schedule_after(SimTime::from_millis(10), rx_end(1));
        s.schedule_after(SimTime::from_millis(20), rx_end(2));
        assert_eq!(s.peek_time(), Some(SimTime::from_millis(10)));
        let order: Vec<usize> = std::iter::from_fn(|| s.pop()).map(phy_of).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(s.now(), SimTime::from_millis(30));
        assert_eq!(s.processed(), 3);
    }

    #[test]
    fn same_time_events_are_fifo() {
        let mut s = Scheduler::new();
        for i in 0..5 {
            s.schedule_after(SimTime::ZERO, rx_end(i));
        }
        let order: Vec<usize> = std::iter::from_fn(|| s.pop()).map(phy_of).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn past_times_are_clamped_to_now() {
        let mut s = Scheduler::new();
        s.schedule_after(SimTime::from_millis(5), rx_end(0));
        s.pop();
        s.schedule_at(SimTime::from_millis(1), rx_end(1));
        assert_eq!(s.peek_time(), Some(SimTime::from_millis(5)));
        s.advance_to(SimTime::from_millis(2));
        assert_eq!(s.now(), SimTime::from_millis(5));
    }
}
