use std::panic;
use std::panic::AssertUnwindSafe;
use std::thread;

use crate::list::GarbageList;
use crate::reserve::HeldSlot;
use crate::reserve::Reservation;
use crate::slot::EMPTY;
use crate::slot::LOCKED;
use crate::slot::SlotIndex;
use crate::tests::support::Counters;
use crate::tests::support::ManualOracle;
use crate::tests::support::config;

fn epoch_of(list: &GarbageList<&ManualOracle>, index: SlotIndex) -> u64 {
  list.ring().slot(index).epoch()
}

#[test]
fn test_reserve_then_reset() {
  let oracle: ManualOracle = ManualOracle::new();
  let counters: Counters = Counters::new(1);
  let list: GarbageList<&ManualOracle> = GarbageList::with_config(config(&oracle, 8)).unwrap();

  let mut reservation: Reservation<'_> = list.reserve();
  let index: SlotIndex = reservation.index();

  assert_eq!(epoch_of(&list, index), LOCKED);

  // SAFETY: `counters` outlives the list.
  unsafe {
    reservation.stage(Counters::object(0), Counters::DESTRUCTOR, counters.context());
  }

  assert_eq!(epoch_of(&list, index), LOCKED, "staging must keep the slot locked");

  reservation.reset();

  assert_eq!(epoch_of(&list, index), EMPTY);
  assert_eq!(counters.total(), 0, "reset must not run the destructor");
}

#[test]
fn test_dropped_reservation_resets() {
  let oracle: ManualOracle = ManualOracle::new();
  let list: GarbageList<&ManualOracle> = GarbageList::with_config(config(&oracle, 8)).unwrap();

  let index: SlotIndex = {
    let reservation: Reservation<'_> = list.reserve();
    reservation.index()
  };

  assert_eq!(epoch_of(&list, index), EMPTY);
  assert_eq!(list.live(), 0);
}

#[test]
fn test_publish_makes_slot_live() {
  let oracle: ManualOracle = ManualOracle::new();
  let counters: Counters = Counters::new(1);
  let mut list: GarbageList<&ManualOracle> = GarbageList::with_config(config(&oracle, 8)).unwrap();

  oracle.freeze();
  oracle.set_current(7);

  let reservation: Reservation<'_> = list.reserve();
  let index: SlotIndex = reservation.index();

  // SAFETY: `counters` outlives the list.
  unsafe {
    reservation.publish(Counters::object(0), Counters::DESTRUCTOR, counters.context());
  }

  assert_eq!(epoch_of(&list, index), 7);
  assert_eq!(list.live(), 1);
  assert_eq!(list.uninitialize(), 1);

  counters.assert_each_once();
}

#[test]
fn test_reservation_reclaims_previous_occupant() {
  let oracle: ManualOracle = ManualOracle::new();
  let counters: Counters = Counters::new(4);
  let list: GarbageList<&ManualOracle> = GarbageList::with_config(config(&oracle, 4)).unwrap();

  for index in 0..4 {
    // SAFETY: `counters` outlives the list.
    unsafe {
      list.push(Counters::object(index), Counters::DESTRUCTOR, counters.context());
    }
  }

  let reservation: Reservation<'_> = list.reserve();

  assert_eq!(reservation.index().get(), 0);
  assert_eq!(counters.get(0), 1, "the slot's previous object must be destroyed");

  drop(reservation);
  drop(list);

  counters.assert_each_once();
}

#[test]
fn test_held_slot_stays_locked() {
  let oracle: ManualOracle = ManualOracle::new();
  let list: GarbageList<&ManualOracle> = GarbageList::with_config(config(&oracle, 4)).unwrap();

  let held: HeldSlot = list.reserve().into_held();
  let index: SlotIndex = held.index();

  // Producers skip the held slot, lap after lap.
  for _ in 0..12 {
    list.retire(Box::new(0_u64));
  }

  assert_eq!(epoch_of(&list, index), LOCKED);
  assert_eq!(list.live(), 3);

  list.reset_item(held);

  assert_eq!(epoch_of(&list, index), EMPTY);
}

#[test]
#[should_panic(expected = "belongs to another garbage list")]
fn test_reset_item_rejects_foreign_slot() {
  let oracle: ManualOracle = ManualOracle::new();
  let first: GarbageList<&ManualOracle> = GarbageList::with_config(config(&oracle, 4)).unwrap();
  let second: GarbageList<&ManualOracle> = GarbageList::with_config(config(&oracle, 4)).unwrap();

  // Lock the same position in `second`, as a producer mid-acquire would.
  let busy: Reservation<'_> = second.reserve();
  let held: HeldSlot = first.reserve().into_held();

  assert_eq!(busy.index(), held.index());

  second.reset_item(held);
}

#[test]
fn test_foreign_slot_leaves_holder_locked() {
  let oracle: ManualOracle = ManualOracle::new();
  let first: GarbageList<&ManualOracle> = GarbageList::with_config(config(&oracle, 4)).unwrap();
  let second: GarbageList<&ManualOracle> = GarbageList::with_config(config(&oracle, 4)).unwrap();

  let busy: Reservation<'_> = second.reserve();
  let held: HeldSlot = first.reserve().into_held();
  let index: SlotIndex = busy.index();

  let result: thread::Result<()> = panic::catch_unwind(AssertUnwindSafe(|| second.reset_item(held)));

  assert!(result.is_err());
  assert_eq!(epoch_of(&second, index), LOCKED, "another list's token must not unlock the slot");

  drop(busy);

  assert_eq!(epoch_of(&second, index), EMPTY);
}

#[test]
#[should_panic(expected = "is not locked")]
fn test_reset_requires_lock() {
  let oracle: ManualOracle = ManualOracle::new();
  let list: GarbageList<&ManualOracle> = GarbageList::with_config(config(&oracle, 4)).unwrap();

  list.ring().reset(SlotIndex::new(2));
}

#[test]
#[should_panic(expected = "out of range")]
fn test_reset_out_of_range() {
  let oracle: ManualOracle = ManualOracle::new();
  let list: GarbageList<&ManualOracle> = GarbageList::with_config(config(&oracle, 4)).unwrap();

  list.ring().reset(SlotIndex::new(4));
}

#[test]
fn test_staged_reservation_destroyed_on_uninitialize() {
  let oracle: ManualOracle = ManualOracle::new();
  let counters: Counters = Counters::new(1);
  let mut list: GarbageList<&ManualOracle> = GarbageList::with_config(config(&oracle, 4)).unwrap();

  let mut reservation: Reservation<'_> = list.reserve();

  // SAFETY: `counters` outlives the list.
  unsafe {
    reservation.stage(Counters::object(0), Counters::DESTRUCTOR, counters.context());
  }

  let _held: HeldSlot = reservation.into_held();

  assert_eq!(list.live(), 0, "a staged slot is not live");
  assert_eq!(list.uninitialize(), 1);

  counters.assert_each_once();
}
