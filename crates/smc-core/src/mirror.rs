//! Local mirror of remote members and groups.
//!
//! Pure state; every remote call is made by [`crate::driver::MiraiDriver`],
//! which only touches the mirror once the remote side has succeeded.

use std::collections::{BTreeSet, HashMap};

use crate::domain::{Group, GroupId, Member, MemberId};

/// Seeding lifecycle of one collection. There is no way back to `Cold` once
/// `Populated`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SeedState {
    #[default]
    Cold,
    Seeding,
    Populated,
}

#[derive(Debug, Default)]
pub struct Mirror {
    members: HashMap<MemberId, Member>,
    member_state: SeedState,
    groups: HashMap<GroupId, Group>,
    group_state: SeedState,
    default_group: Option<GroupId>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn member_state(&self) -> SeedState {
        self.member_state
    }

    pub fn group_state(&self) -> SeedState {
        self.group_state
    }

    pub fn default_group(&self) -> Option<&GroupId> {
        self.default_group.as_ref()
    }

    /// Record the remote's default group and purge it from everything cached.
    pub fn set_default_group(&mut self, id: GroupId) {
        self.groups.remove(&id);
        for member in self.members.values_mut() {
            if let Some(groups) = member.groups.as_mut() {
                groups.remove(&id);
            }
        }
        self.default_group = Some(id);
    }

    pub fn is_default_group(&self, id: &GroupId) -> bool {
        self.default_group.as_ref() == Some(id)
    }

    // ============== Seeding ==============

    /// Returns false once the member collection is populated.
    ///
    /// A `Seeding` state found here belongs to a seed whose future was dropped
    /// (the caller holds the mirror lock for the whole seed), so it restarts.
    pub fn begin_member_seed(&mut self) -> bool {
        if self.member_state == SeedState::Populated {
            return false;
        }
        self.member_state = SeedState::Seeding;
        true
    }

    pub fn finish_member_seed(&mut self, seeded: Vec<Member>) {
        for member in seeded {
            self.upsert_member(member);
        }
        self.member_state = SeedState::Populated;
    }

    pub fn abort_member_seed(&mut self) {
        if self.member_state == SeedState::Seeding {
            self.member_state = SeedState::Cold;
        }
    }

    pub fn begin_group_seed(&mut self) -> bool {
        if self.group_state == SeedState::Populated {
            return false;
        }
        self.group_state = SeedState::Seeding;
        true
    }

    pub fn finish_group_seed(&mut self, seeded: Vec<Group>) {
        for group in seeded {
            if self.is_default_group(&group.id) {
                continue;
            }
            self.groups.entry(group.id.clone()).or_insert(group);
        }
        self.group_state = SeedState::Populated;
    }

    pub fn abort_group_seed(&mut self) {
        if self.group_state == SeedState::Seeding {
            self.group_state = SeedState::Cold;
        }
    }

    // ============== Reads ==============

    pub fn members(&self) -> Vec<Member> {
        let mut out = self.members.values().cloned().collect::<Vec<_>>();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn groups(&self) -> Vec<Group> {
        let mut out = self.groups.values().cloned().collect::<Vec<_>>();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn member(&self, id: &MemberId) -> Option<&Member> {
        self.members.get(id)
    }

    pub fn group(&self, id: &GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    // ============== Writes ==============

    /// Insert a member, or refresh name and unique id while keeping loaded sets.
    pub fn upsert_member(&mut self, member: Member) {
        match self.members.get_mut(&member.id) {
            Some(existing) => {
                existing.name = member.name;
                existing.unique_id = member.unique_id;
                if member.groups.is_some() {
                    existing.groups = member.groups;
                }
            }
            None => {
                self.members.insert(member.id.clone(), member);
            }
        }
    }

    /// Returns the previous name.
    pub fn rename_member(&mut self, id: &MemberId, name: &str) -> Option<String> {
        let member = self.members.get_mut(id)?;
        Some(std::mem::replace(&mut member.name, name.to_string()))
    }

    pub fn set_group_members(&mut self, group: &GroupId, members: BTreeSet<MemberId>) {
        if let Some(g) = self.groups.get_mut(group) {
            g.members = Some(members);
        }
    }

    pub fn set_member_groups(&mut self, member: &MemberId, groups: BTreeSet<GroupId>) {
        let default = self.default_group.clone();
        if let Some(m) = self.members.get_mut(member) {
            m.groups = Some(
                groups
                    .into_iter()
                    .filter(|g| Some(g) != default.as_ref())
                    .collect(),
            );
        }
    }

    /// Record a membership on both sides. Unloaded sets stay unloaded.
    pub fn link(&mut self, member: &MemberId, group: &GroupId) {
        if let Some(set) = self.groups.get_mut(group).and_then(|g| g.members.as_mut()) {
            set.insert(member.clone());
        }
        if let Some(set) = self.members.get_mut(member).and_then(|m| m.groups.as_mut()) {
            set.insert(group.clone());
        }
    }

    pub fn unlink(&mut self, member: &MemberId, group: &GroupId) {
        if let Some(set) = self.groups.get_mut(group).and_then(|g| g.members.as_mut()) {
            set.remove(member);
        }
        if let Some(set) = self.members.get_mut(member).and_then(|m| m.groups.as_mut()) {
            set.remove(group);
        }
    }
}
