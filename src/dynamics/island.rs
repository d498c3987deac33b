use crate::core::body::{IslandRef, ListHead, RigidBody};
use crate::dynamics::contact_db::ContactDatabase;
use crate::events::{EventQueue, PhysicsEventKind};
use crate::utils::allocator::{Pool, NIL};

/// Island state bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IslandFlags(u32);

impl IslandFlags {
    pub const AWAKE: u32 = 1 << 0;
    /// Reset member sleep timers during the next solve.
    pub const SLEEP_RESET: u32 = 1 << 1;
    /// Island lost a contact this tick and is queued for splitting.
    pub const SPLIT: u32 = 1 << 2;
    /// Low-energy threshold reached; sleeps at the next undisturbed solve.
    /// Kept awake one extra tick so proxies settle before bodies stop.
    pub const TRY_SLEEP: u32 = 1 << 3;

    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn contains(&self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    pub fn insert(&mut self, bits: u32) {
        self.0 |= bits;
    }

    pub fn remove(&mut self, bits: u32) {
        self.0 &= !bits;
    }

    pub fn is_awake(&self) -> bool {
        self.contains(Self::AWAKE)
    }
}

/// Persistent connectivity component over dynamic bodies. Body and contact
/// membership are intrusive lists threaded through the respective pools.
#[derive(Debug, Clone, Default)]
pub struct Island {
    pub flags: IslandFlags,
    pub body_list: ListHead,
    pub contact_list: ListHead,
}

/// Database of persistent islands plus the per-tick split candidates.
#[derive(Default)]
pub struct IslandDatabase {
    pub islands: Pool<Island>,
    pub possible_splits: Vec<u32>,
}

impl IslandDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_frame(&mut self) {
        self.possible_splits.clear();
    }

    fn island_empty(&mut self, events: &mut EventQueue, sleep_enabled: bool) -> u32 {
        let flags = if sleep_enabled {
            IslandFlags::new(IslandFlags::AWAKE | IslandFlags::SLEEP_RESET)
        } else {
            IslandFlags::default()
        };
        let index = self.islands.insert(Island {
            flags,
            body_list: ListHead::default(),
            contact_list: ListHead::default(),
        });
        events.push(PhysicsEventKind::IslandNew { island: index });
        index
    }

    /// Every new dynamic body starts as a singleton island.
    pub fn init_island_from_body(
        &mut self,
        bodies: &mut Pool<RigidBody>,
        events: &mut EventQueue,
        body: u32,
        sleep_enabled: bool,
    ) -> u32 {
        let island = self.island_empty(events, sleep_enabled);
        self.body_append(bodies, island, body);
        island
    }

    fn body_append(&mut self, bodies: &mut Pool<RigidBody>, island: u32, body: u32) {
        let list = self.islands.at(island).body_list;
        {
            let b = bodies.at_mut(body);
            b.island = IslandRef::Handle(island);
            b.island_prev = list.last;
            b.island_next = NIL;
        }
        if list.last != NIL {
            bodies.at_mut(list.last).island_next = body;
        }
        let is = self.islands.at_mut(island);
        if is.body_list.first == NIL {
            is.body_list.first = body;
        }
        is.body_list.last = body;
        is.body_list.count += 1;
    }

    fn body_remove(&mut self, bodies: &mut Pool<RigidBody>, island: u32, body: u32) {
        let (prev, next) = {
            let b = bodies.at(body);
            (b.island_prev, b.island_next)
        };
        if prev != NIL {
            bodies.at_mut(prev).island_next = next;
        }
        if next != NIL {
            bodies.at_mut(next).island_prev = prev;
        }
        let is = self.islands.at_mut(island);
        if is.body_list.first == body {
            is.body_list.first = next;
        }
        if is.body_list.last == body {
            is.body_list.last = prev;
        }
        is.body_list.count -= 1;
        let b = bodies.at_mut(body);
        b.island_prev = NIL;
        b.island_next = NIL;
    }

    pub fn contact_append(&mut self, cdb: &mut ContactDatabase, island: u32, contact: u32) {
        let list = self.islands.at(island).contact_list;
        {
            let c = cdb.contacts.at_mut(contact);
            c.island_prev = list.last;
            c.island_next = NIL;
        }
        if list.last != NIL {
            cdb.contacts.at_mut(list.last).island_next = contact;
        }
        let is = self.islands.at_mut(island);
        if is.contact_list.first == NIL {
            is.contact_list.first = contact;
        }
        is.contact_list.last = contact;
        is.contact_list.count += 1;
    }

    pub fn contact_remove(&mut self, cdb: &mut ContactDatabase, island: u32, contact: u32) {
        let (prev, next) = {
            let c = cdb.contacts.at(contact);
            (c.island_prev, c.island_next)
        };
        if prev != NIL {
            cdb.contacts.at_mut(prev).island_next = next;
        }
        if next != NIL {
            cdb.contacts.at_mut(next).island_prev = prev;
        }
        let is = self.islands.at_mut(island);
        if is.contact_list.first == contact {
            is.contact_list.first = next;
        }
        if is.contact_list.last == contact {
            is.contact_list.last = prev;
        }
        is.contact_list.count -= 1;
        let c = cdb.contacts.at_mut(contact);
        c.island_prev = NIL;
        c.island_next = NIL;
    }

    pub fn body_to_island(bodies: &Pool<RigidBody>, body: u32) -> Option<u32> {
        bodies.at(body).island.handle()
    }

    /// Tag the body's island for a deferred split this tick.
    pub fn tag_for_splitting(&mut self, bodies: &Pool<RigidBody>, body: u32) {
        let island = bodies
            .at(body)
            .island
            .handle()
            .expect("split tag on island-less body");
        let is = self.islands.at_mut(island);
        if !is.flags.contains(IslandFlags::SPLIT) {
            is.flags.insert(IslandFlags::SPLIT);
            self.possible_splits.push(island);
        }
    }

    /// Merge on a new dynamic-dynamic contact. Same island: the contact is
    /// appended locally. Distinct islands: the merged island's lists are
    /// spliced into the expanded one (the new contact sits between them),
    /// every merged body is retargeted, and the merged island is freed. A
    /// sleeping or try-sleeping participant wakes the result.
    pub fn merge(
        &mut self,
        bodies: &mut Pool<RigidBody>,
        cdb: &mut ContactDatabase,
        events: &mut EventQueue,
        contact: u32,
        b1: u32,
        b2: u32,
        sleep_enabled: bool,
    ) {
        let expand = bodies.at(b1).island.handle().expect("dynamic body without island");
        let merge = bodies.at(b2).island.handle().expect("dynamic body without island");

        if expand == merge {
            self.contact_append(cdb, expand, contact);
            return;
        }

        if sleep_enabled {
            let expand_flags = self.islands.at(expand).flags;
            let merge_flags = self.islands.at(merge).flags;
            debug_assert!(expand_flags.is_awake() || merge_flags.is_awake());
            let interrupted = !(expand_flags.is_awake() && merge_flags.is_awake())
                || expand_flags.contains(IslandFlags::TRY_SLEEP)
                || merge_flags.contains(IslandFlags::TRY_SLEEP);
            if interrupted {
                if !expand_flags.is_awake() {
                    events.push(PhysicsEventKind::IslandAwake { island: expand });
                }
                self.islands.at_mut(expand).flags =
                    IslandFlags::new(IslandFlags::AWAKE | IslandFlags::SLEEP_RESET);
            }
        }

        // splice contact lists with the new contact in the middle
        let e_contacts = self.islands.at(expand).contact_list;
        let m_contacts = self.islands.at(merge).contact_list;
        {
            let c = cdb.contacts.at_mut(contact);
            c.island_prev = NIL;
            c.island_next = NIL;
        }
        if e_contacts.count == 0 {
            self.islands.at_mut(expand).contact_list.first = contact;
        } else {
            cdb.contacts.at_mut(e_contacts.last).island_next = contact;
            cdb.contacts.at_mut(contact).island_prev = e_contacts.last;
        }
        if m_contacts.count == 0 {
            self.islands.at_mut(expand).contact_list.last = contact;
        } else {
            self.islands.at_mut(expand).contact_list.last = m_contacts.last;
            cdb.contacts.at_mut(m_contacts.first).island_prev = contact;
            cdb.contacts.at_mut(contact).island_next = m_contacts.first;
        }
        self.islands.at_mut(expand).contact_list.count = e_contacts.count + m_contacts.count + 1;

        // splice body lists and retarget the merged bodies
        let e_bodies = self.islands.at(expand).body_list;
        let m_bodies = self.islands.at(merge).body_list;
        debug_assert!(e_bodies.count > 0 && m_bodies.count > 0);
        bodies.at_mut(e_bodies.last).island_next = m_bodies.first;
        bodies.at_mut(m_bodies.first).island_prev = e_bodies.last;
        {
            let is = self.islands.at_mut(expand);
            is.body_list.last = m_bodies.last;
            is.body_list.count = e_bodies.count + m_bodies.count;
        }
        let mut body = m_bodies.first;
        while body != NIL {
            let b = bodies.at_mut(body);
            b.island = IslandRef::Handle(expand);
            body = b.island_next;
        }

        self.islands.remove(merge);
        events.push(PhysicsEventKind::IslandExpanded { island: expand });
        events.push(PhysicsEventKind::IslandRemoved { island: merge });
    }

    /// Deferred split: flood-fill from each remaining body across surviving
    /// contacts; every component becomes a fresh island. The split island's
    /// contacts are rerouted to the island of either endpoint (static
    /// endpoints route via the dynamic side) before it is freed.
    pub fn split(
        &mut self,
        bodies: &mut Pool<RigidBody>,
        cdb: &mut ContactDatabase,
        events: &mut EventQueue,
        island_index: u32,
        sleep_enabled: bool,
    ) {
        let mut stack: Vec<u32> = Vec::new();

        while self.islands.at(island_index).body_list.first != NIL {
            let seed = self.islands.at(island_index).body_list.first;
            let new_island = self.island_empty(events, sleep_enabled);
            self.body_remove(bodies, island_index, seed);
            self.body_append(bodies, new_island, seed);

            stack.clear();
            stack.push(seed);
            while let Some(body) = stack.pop() {
                let head = bodies.at(body).contact_first;
                for ci in cdb.body_contacts(body, head) {
                    let neighbour = cdb.contacts.at(ci).other(body);
                    if bodies.at(neighbour).island == IslandRef::Handle(island_index) {
                        self.body_remove(bodies, island_index, neighbour);
                        self.body_append(bodies, new_island, neighbour);
                        stack.push(neighbour);
                    }
                }
            }
        }

        // reroute surviving contacts to their new islands
        let mut ci = self.islands.at(island_index).contact_list.first;
        while ci != NIL {
            let next = cdb.contacts.at(ci).island_next;
            let (b1, b2) = {
                let c = cdb.contacts.at(ci);
                (c.body_low(), c.body_high())
            };
            let target = bodies
                .at(b1)
                .island
                .handle()
                .or_else(|| bodies.at(b2).island.handle())
                .expect("contact with two static endpoints");
            self.contact_append(cdb, target, ci);
            ci = next;
        }

        self.islands.remove(island_index);
        events.push(PhysicsEventKind::IslandRemoved {
            island: island_index,
        });
    }

    /// Detach a dying body's list nodes: its incident contacts leave the
    /// island contact list, the body leaves the body list, and an emptied
    /// island is freed.
    pub fn remove_body_resources(
        &mut self,
        bodies: &mut Pool<RigidBody>,
        cdb: &mut ContactDatabase,
        events: &mut EventQueue,
        island_index: u32,
        body: u32,
    ) {
        let head = bodies.at(body).contact_first;
        for ci in cdb.body_contacts(body, head) {
            self.contact_remove(cdb, island_index, ci);
        }
        self.body_remove(bodies, island_index, body);

        if self.islands.at(island_index).body_list.count == 0 {
            debug_assert_eq!(self.islands.at(island_index).contact_list.count, 0);
            self.islands.remove(island_index);
            events.push(PhysicsEventKind::IslandRemoved {
                island: island_index,
            });
        }
    }

    /// Debug sweep over the island invariants: body lists match the body →
    /// island map, contact endpoints belong to the island, singleton islands
    /// carry no contacts.
    pub fn validate(&self, bodies: &Pool<RigidBody>, cdb: &ContactDatabase) {
        for (index, island) in self.islands.iter() {
            let mut count = 0;
            let mut body = island.body_list.first;
            let mut seen = std::collections::HashSet::new();
            while body != NIL {
                let b = bodies.at(body);
                debug_assert_eq!(b.island, IslandRef::Handle(index));
                debug_assert!(seen.insert(body), "duplicate body in island list");
                count += 1;
                body = b.island_next;
            }
            debug_assert_eq!(count, island.body_list.count);

            let mapped = bodies
                .iter()
                .filter(|(_, b)| b.island == IslandRef::Handle(index))
                .count() as u32;
            debug_assert_eq!(mapped, island.body_list.count);

            if island.contact_list.count == 0 {
                debug_assert_eq!(island.body_list.count, 1);
                let b = bodies.at(island.body_list.first);
                debug_assert_eq!(b.contact_first, NIL);
            }

            let mut ccount = 0;
            let mut contact = island.contact_list.first;
            while contact != NIL {
                let c = cdb.contacts.at(contact);
                let i1 = bodies.at(c.body_low()).island;
                let i2 = bodies.at(c.body_high()).island;
                debug_assert!(
                    i1 == IslandRef::Handle(index) || i2 == IslandRef::Handle(index),
                    "island contact with foreign endpoints"
                );
                ccount += 1;
                contact = c.island_next;
            }
            debug_assert_eq!(ccount, island.contact_list.count);
        }
    }
}
