//! Driver facade: the single entry point the host application talks to.

use std::{collections::BTreeSet, future::Future, sync::Arc};

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    commands::{
        GroupRow, MemberRefRow, MemberRow, ServerInfoRow, GROUP_ADD_MEMBER, GROUP_DEL_MEMBER,
        GROUP_LIST, GROUP_MEMBERS, IDENTITY_NOT_FOUND, MEMBER_EDIT, MEMBER_GROUPS, MEMBER_INFO,
        MEMBER_LIST, NO_MORE_DATA, SERVER_INFO,
    },
    config::ConnectorSettings,
    dispatch::{Dispatcher, Envelope, Params},
    domain::{Group, GroupId, Member, MemberId},
    errors::{DriverError, Error},
    mirror::{Mirror, SeedState},
    session::SessionManager,
    transport::{port::Method, Fetcher},
    Result,
};

/// One authenticated connection to a bridge plus its entity mirror.
///
/// Share it behind an `Arc`. Mirror read-modify-write sequences, remote call
/// included, run under a single lock.
pub struct MiraiDriver {
    settings: ConnectorSettings,
    session: SessionManager,
    mirror: Mutex<Mirror>,
}

impl MiraiDriver {
    /// Build the driver and authenticate once.
    pub async fn connect(
        settings: ConnectorSettings,
        fetcher: Arc<dyn Fetcher>,
    ) -> std::result::Result<Self, DriverError> {
        let api = Dispatcher::new(&settings.api_base_uri, fetcher)?;
        let session = SessionManager::new(api, settings.api_key.clone(), settings.bot_id.clone());
        session.authenticate().await?;

        info!(
            api = %settings.api_base_uri,
            bot = %settings.bot_id,
            "mirai driver connected"
        );

        Ok(Self {
            settings,
            session,
            mirror: Mutex::new(Mirror::new()),
        })
    }

    /// Run `f` with a connected driver and release the session on every exit.
    pub async fn scope<F, Fut, T>(
        settings: ConnectorSettings,
        fetcher: Arc<dyn Fetcher>,
        f: F,
    ) -> std::result::Result<T, DriverError>
    where
        F: FnOnce(Arc<MiraiDriver>) -> Fut,
        Fut: Future<Output = std::result::Result<T, DriverError>>,
    {
        let driver = Arc::new(Self::connect(settings, fetcher).await?);
        let out = f(Arc::clone(&driver)).await;
        driver.release().await;
        out
    }

    pub fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    pub async fn has_session(&self) -> bool {
        self.session.is_active().await
    }

    /// Best-effort logout. Later calls re-authenticate.
    pub async fn release(&self) {
        self.session.release().await;
    }

    // ============== Facade ==============

    pub async fn list_members(&self) -> std::result::Result<Vec<Member>, DriverError> {
        let mut mirror = self.mirror.lock().await;
        self.ensure_members(&mut mirror).await?;
        Ok(mirror.members())
    }

    pub async fn list_groups(&self) -> std::result::Result<Vec<Group>, DriverError> {
        let mut mirror = self.mirror.lock().await;
        self.ensure_groups(&mut mirror).await?;
        Ok(mirror.groups())
    }

    pub async fn get_member(&self, id: &MemberId) -> std::result::Result<Member, DriverError> {
        let mut mirror = self.mirror.lock().await;
        Ok(self.resolve_member(&mut mirror, id).await?)
    }

    /// Groups are only known through the seeded listing.
    pub async fn get_group(&self, id: &GroupId) -> std::result::Result<Option<Group>, DriverError> {
        let mut mirror = self.mirror.lock().await;
        self.ensure_groups(&mut mirror).await?;
        Ok(mirror.group(id).cloned())
    }

    pub async fn group_members(&self, group: &GroupId) -> std::result::Result<Vec<Member>, DriverError> {
        let mut mirror = self.mirror.lock().await;
        Ok(self.load_group_members(&mut mirror, group).await?)
    }

    /// Managed groups of a member; the default group is never included.
    pub async fn member_groups(&self, member: &MemberId) -> std::result::Result<Vec<Group>, DriverError> {
        let mut mirror = self.mirror.lock().await;
        Ok(self.load_member_groups(&mut mirror, member).await?)
    }

    /// Rename on the remote; the mirror follows only once the remote acknowledged.
    pub async fn rename_member(
        &self,
        member: &MemberId,
        name: &str,
    ) -> std::result::Result<(), DriverError> {
        let mut mirror = self.mirror.lock().await;
        Ok(self.rename(&mut mirror, member, name).await?)
    }

    pub async fn add_member_to_group(
        &self,
        member: &MemberId,
        group: &GroupId,
    ) -> std::result::Result<(), DriverError> {
        let mut mirror = self.mirror.lock().await;
        Ok(self.change_membership(&mut mirror, member, group, true).await?)
    }

    pub async fn remove_member_from_group(
        &self,
        member: &MemberId,
        group: &GroupId,
    ) -> std::result::Result<(), DriverError> {
        let mut mirror = self.mirror.lock().await;
        Ok(self.change_membership(&mut mirror, member, group, false).await?)
    }

    // ============== Internals ==============

    fn params<const N: usize>(&self, pairs: [(&str, Value); N]) -> Params {
        let mut params = Params::new();
        params.insert(
            "instance".to_string(),
            Value::String(self.settings.instance_id.clone()),
        );
        for (k, v) in pairs {
            params.insert(k.to_string(), v);
        }
        params
    }

    async fn call(&self, method: Method, path: &str, params: Params) -> Result<Envelope> {
        self.session.call(method, path, params).await
    }

    async fn ensure_members(&self, mirror: &mut Mirror) -> Result<()> {
        if !mirror.begin_member_seed() {
            return Ok(());
        }
        match self.fetch_all_members().await {
            Ok(members) => {
                debug!(count = members.len(), "member mirror seeded");
                mirror.finish_member_seed(members);
                Ok(())
            }
            Err(e) => {
                mirror.abort_member_seed();
                Err(e)
            }
        }
    }

    async fn fetch_all_members(&self) -> Result<Vec<Member>> {
        let mut start = 0usize;
        let mut members = Vec::new();

        loop {
            let env = match self
                .call(Method::GET, MEMBER_LIST, self.params([("start", json!(start))]))
                .await
            {
                Ok(env) => env,
                Err(Error::Command { code, .. }) if code == NO_MORE_DATA => break,
                Err(e) => return Err(e),
            };

            let rows = env.rows::<MemberRow>()?;
            if rows.is_empty() {
                break;
            }
            start += rows.len();
            members.extend(rows.into_iter().map(MemberRow::into_member));
        }

        Ok(members)
    }

    async fn ensure_default_group(&self, mirror: &mut Mirror) -> Result<GroupId> {
        if let Some(id) = mirror.default_group() {
            return Ok(id.clone());
        }
        let env = self.call(Method::GET, SERVER_INFO, self.params([])).await?;
        let info = env.first::<ServerInfoRow>()?.ok_or_else(|| Error::Command {
            code: -1,
            message: "server info response carried no data".to_string(),
        })?;
        let id = GroupId(info.virtualserver_default_server_group);
        mirror.set_default_group(id.clone());
        Ok(id)
    }

    async fn ensure_groups(&self, mirror: &mut Mirror) -> Result<()> {
        if mirror.group_state() == SeedState::Populated {
            return Ok(());
        }
        let default = self.ensure_default_group(mirror).await?;
        if !mirror.begin_group_seed() {
            return Ok(());
        }

        let rows = self
            .call(Method::GET, GROUP_LIST, self.params([]))
            .await
            .and_then(|env| env.rows::<GroupRow>());
        match rows {
            Ok(rows) => {
                let groups = rows
                    .into_iter()
                    .filter(|g| g.is_normal() && g.sgid != default.0)
                    .map(GroupRow::into_group)
                    .collect::<Vec<_>>();
                debug!(count = groups.len(), default = %default, "group mirror seeded");
                mirror.finish_group_seed(groups);
                Ok(())
            }
            Err(e) => {
                mirror.abort_group_seed();
                Err(e)
            }
        }
    }

    async fn resolve_member(&self, mirror: &mut Mirror, id: &MemberId) -> Result<Member> {
        self.ensure_members(mirror).await?;
        if let Some(member) = mirror.member(id) {
            return Ok(member.clone());
        }

        let lookup = self
            .call(Method::GET, MEMBER_INFO, self.params([("cldbid", json!(id.0))]))
            .await;
        let env = match lookup {
            Ok(env) => env,
            Err(Error::Command { code, .. }) if code == IDENTITY_NOT_FOUND => {
                return Err(Error::IdentityNotFound { id: id.0.clone() })
            }
            Err(e) => return Err(e),
        };
        let member = env
            .first::<MemberRow>()?
            .map(MemberRow::into_member)
            .ok_or_else(|| Error::IdentityNotFound { id: id.0.clone() })?;

        mirror.upsert_member(member.clone());
        Ok(member)
    }

    async fn load_group_members(&self, mirror: &mut Mirror, group: &GroupId) -> Result<Vec<Member>> {
        self.ensure_groups(mirror).await?;
        let loaded = mirror
            .group(group)
            .map(|g| g.members.clone())
            .ok_or_else(|| Error::IdentityNotFound { id: group.0.clone() })?;

        let ids = match loaded {
            Some(ids) => ids,
            None => {
                let env = self
                    .call(Method::GET, GROUP_MEMBERS, self.params([("sgid", json!(group.0))]))
                    .await?;
                let ids = env
                    .rows::<MemberRefRow>()?
                    .into_iter()
                    .map(|r| MemberId(r.cldbid))
                    .collect::<BTreeSet<_>>();
                mirror.set_group_members(group, ids.clone());
                ids
            }
        };

        let mut members = Vec::with_capacity(ids.len());
        for id in &ids {
            members.push(self.resolve_member(mirror, id).await?);
        }
        Ok(members)
    }

    async fn load_member_groups(&self, mirror: &mut Mirror, member: &MemberId) -> Result<Vec<Group>> {
        self.ensure_groups(mirror).await?;
        let resolved = self.resolve_member(mirror, member).await?;

        let ids = match resolved.groups {
            Some(ids) => ids,
            None => {
                let env = self
                    .call(
                        Method::GET,
                        MEMBER_GROUPS,
                        self.params([("cldbid", json!(member.0))]),
                    )
                    .await?;
                let ids = env
                    .rows::<GroupRow>()?
                    .into_iter()
                    .map(|r| GroupId(r.sgid))
                    .filter(|id| mirror.group(id).is_some())
                    .collect::<BTreeSet<_>>();
                mirror.set_member_groups(member, ids.clone());
                ids
            }
        };

        Ok(ids
            .iter()
            .filter_map(|id| mirror.group(id).cloned())
            .collect())
    }

    async fn change_membership(
        &self,
        mirror: &mut Mirror,
        member: &MemberId,
        group: &GroupId,
        add: bool,
    ) -> Result<()> {
        self.ensure_groups(mirror).await?;
        let known = mirror
            .group(group)
            .map(|g| g.members.as_ref().map(|set| set.contains(member)))
            .ok_or_else(|| Error::IdentityNotFound { id: group.0.clone() })?;
        self.resolve_member(mirror, member).await?;

        if known == Some(add) {
            return Ok(());
        }

        let path = if add { GROUP_ADD_MEMBER } else { GROUP_DEL_MEMBER };
        self.call(
            Method::POST,
            path,
            self.params([("sgid", json!(group.0)), ("cldbid", json!(member.0))]),
        )
        .await?;

        if add {
            mirror.link(member, group);
        } else {
            mirror.unlink(member, group);
        }
        Ok(())
    }

    async fn rename(&self, mirror: &mut Mirror, member: &MemberId, name: &str) -> Result<()> {
        let current = self.resolve_member(mirror, member).await?;
        if current.name == name {
            return Ok(());
        }

        self.call(
            Method::POST,
            MEMBER_EDIT,
            self.params([("cldbid", json!(member.0)), ("client_nickname", json!(name))]),
        )
        .await?;

        mirror.rename_member(member, name);
        Ok(())
    }
}
