use crate::{JunctionId, NodeId, VehicleId};
use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;

/// A scheduled occurrence in the simulation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// A vehicle completes its scheduled manoeuvre.
    Vehicle(VehicleId),
    /// A signal phase takes effect at a junction.
    Phase {
        junction: JunctionId,
        phase: usize,
        end_time: f64,
    },
    /// Pedestrians start crossing.
    CrossingStart { junction: JunctionId, end_time: f64 },
    /// Pedestrians finish crossing.
    CrossingEnd { junction: JunctionId },
    /// A node becomes obstructed.
    ObstructionStart { node: NodeId, end_time: f64 },
    /// An obstruction clears.
    ObstructionEnd { node: NodeId },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct Entry {
    time: f64,
    seq: u64,
    event: Event,
}

/// The global event queue.
///
/// A binary min-heap ordered by time, with insertion order breaking ties.
/// Vehicle events are indexed by ID so that rescheduling a vehicle updates
/// its entry in place; a vehicle never has more than one pending event.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventQueue {
    heap: Vec<Entry>,
    positions: SecondaryMap<VehicleId, usize>,
    next_seq: u64,
    clock: f64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The time of the last popped event.
    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Moves the clock forward without processing anything.
    pub fn advance_to(&mut self, time: f64) {
        if time > self.clock {
            self.clock = time;
        }
    }

    /// Time of the next event, if any.
    pub fn peek_time(&self) -> Option<f64> {
        self.heap.first().map(|e| e.time)
    }

    /// Whether the vehicle has a pending event.
    pub fn contains(&self, vehicle: VehicleId) -> bool {
        self.positions.contains_key(vehicle)
    }

    /// Schedules an event. A vehicle event replaces the vehicle's
    /// existing entry, keeping the heap free of duplicates.
    pub fn push(&mut self, time: f64, event: Event) {
        if let Event::Vehicle(vehicle) = event {
            if let Some(&pos) = self.positions.get(vehicle) {
                self.heap[pos].time = time;
                self.heap[pos].seq = self.next_seq;
                self.next_seq += 1;
                self.resift_vehicle(vehicle);
                return;
            }
        }
        let entry = Entry {
            time,
            seq: self.next_seq,
            event,
        };
        self.next_seq += 1;
        let pos = self.heap.len();
        self.heap.push(entry);
        self.set_index(pos);
        self.sift_up(pos);
    }

    /// Moves a pending vehicle event to a new time. No-op if the vehicle
    /// has no pending event.
    pub fn reschedule(&mut self, vehicle: VehicleId, time: f64) {
        if let Some(&pos) = self.positions.get(vehicle) {
            self.heap[pos].time = time;
            self.resift_vehicle(vehicle);
        }
    }

    /// Drops a vehicle's pending event, if any.
    pub fn remove(&mut self, vehicle: VehicleId) {
        let Some(pos) = self.positions.remove(vehicle) else {
            return;
        };
        let last = self.heap.len() - 1;
        self.heap.swap_remove(pos);
        if pos < last {
            self.set_index(pos);
            if pos > 0 && Self::before(&self.heap[pos], &self.heap[(pos - 1) / 2]) {
                self.sift_up(pos);
            } else {
                self.sift_down(pos);
            }
        }
    }

    /// Pops the next event and advances the clock to its time.
    pub fn pop(&mut self) -> Option<(f64, Event)> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let entry = self.heap.pop()?;
        if let Event::Vehicle(vehicle) = entry.event {
            self.positions.remove(vehicle);
        }
        if !self.heap.is_empty() {
            self.set_index(0);
            self.sift_down(0);
        }
        self.advance_to(entry.time);
        Some((entry.time, entry.event))
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.positions.clear();
    }

    fn before(a: &Entry, b: &Entry) -> bool {
        match a.time.total_cmp(&b.time) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => a.seq < b.seq,
        }
    }

    fn set_index(&mut self, pos: usize) {
        if let Event::Vehicle(vehicle) = self.heap[pos].event {
            self.positions.insert(vehicle, pos);
        }
    }

    fn resift_vehicle(&mut self, vehicle: VehicleId) {
        if let Some(&pos) = self.positions.get(vehicle) {
            self.sift_up(pos);
        }
        if let Some(&pos) = self.positions.get(vehicle) {
            self.sift_down(pos);
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if Self::before(&self.heap[pos], &self.heap[parent]) {
                self.heap.swap(pos, parent);
                self.set_index(pos);
                self.set_index(parent);
                pos = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let left = 2 * pos + 1;
            if left >= self.heap.len() {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < self.heap.len() && Self::before(&self.heap[right], &self.heap[left]) {
                child = right;
            }
            if Self::before(&self.heap[child], &self.heap[pos]) {
                self.heap.swap(pos, child);
                self.set_index(pos);
                self.set_index(child);
                pos = child;
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn vehicle_ids(n: usize) -> Vec<VehicleId> {
        let mut arena: SlotMap<VehicleId, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn pops_in_time_order() {
        let ids = vehicle_ids(3);
        let mut queue = EventQueue::new();
        queue.push(3.0, Event::Vehicle(ids[0]));
        queue.push(1.0, Event::Vehicle(ids[1]));
        queue.push(2.0, Event::Vehicle(ids[2]));
        assert_eq!(queue.pop(), Some((1.0, Event::Vehicle(ids[1]))));
        assert_eq!(queue.pop(), Some((2.0, Event::Vehicle(ids[2]))));
        assert_eq!(queue.pop(), Some((3.0, Event::Vehicle(ids[0]))));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.clock(), 3.0);
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let ids = vehicle_ids(3);
        let mut queue = EventQueue::new();
        for &id in &ids {
            queue.push(5.0, Event::Vehicle(id));
        }
        for &id in &ids {
            assert_eq!(queue.pop(), Some((5.0, Event::Vehicle(id))));
        }
    }

    #[test]
    fn pushing_a_vehicle_twice_replaces_its_entry() {
        let ids = vehicle_ids(2);
        let mut queue = EventQueue::new();
        queue.push(4.0, Event::Vehicle(ids[0]));
        queue.push(2.0, Event::Vehicle(ids[1]));
        queue.push(1.0, Event::Vehicle(ids[0]));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some((1.0, Event::Vehicle(ids[0]))));
        assert_eq!(queue.pop(), Some((2.0, Event::Vehicle(ids[1]))));
        assert!(queue.is_empty());
    }

    #[test]
    fn reschedule_moves_a_pending_event() {
        let ids = vehicle_ids(2);
        let mut queue = EventQueue::new();
        queue.push(1.0, Event::Vehicle(ids[0]));
        queue.push(2.0, Event::Vehicle(ids[1]));
        queue.reschedule(ids[0], 3.0);
        assert_eq!(queue.pop(), Some((2.0, Event::Vehicle(ids[1]))));
        assert_eq!(queue.pop(), Some((3.0, Event::Vehicle(ids[0]))));
    }

    #[test]
    fn remove_drops_the_entry() {
        let ids = vehicle_ids(3);
        let mut queue = EventQueue::new();
        queue.push(1.0, Event::Vehicle(ids[0]));
        queue.push(2.0, Event::Vehicle(ids[1]));
        queue.push(3.0, Event::Vehicle(ids[2]));
        queue.remove(ids[1]);
        assert!(!queue.contains(ids[1]));
        assert_eq!(queue.pop(), Some((1.0, Event::Vehicle(ids[0]))));
        assert_eq!(queue.pop(), Some((3.0, Event::Vehicle(ids[2]))));
    }

    #[test]
    fn clock_never_runs_backwards() {
        let ids = vehicle_ids(1);
        let mut queue = EventQueue::new();
        queue.advance_to(10.0);
        queue.push(4.0, Event::Vehicle(ids[0]));
        queue.pop();
        assert_eq!(queue.clock(), 10.0);
    }
}
