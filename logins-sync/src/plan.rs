//! Per-record merge decisions.
//!
//! Every function here is pure: given what is stored for one id and the
//! incoming version, it returns the [`SyncOp`]s that bring local state in
//! line, plus how the record is counted. The engine gathers the inputs and
//! applies the ops in one transaction per record.

use crate::merge::{Precedence, Side, TieBreak, three_way_merge};
use logins_store::sync::{MirrorRow, SyncOp};
use logins_types::{Guid, Login, ServerTimestamp};
use std::time::Duration;

/// How an incoming record is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Taken as-is, no local changes involved.
    Applied,
    /// Merged with local changes.
    Reconciled,
}

/// The ops for one incoming record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub ops: Vec<SyncOp>,
    pub outcome: Outcome,
}

impl Plan {
    fn new(outcome: Outcome, ops: Vec<SyncOp>) -> Self {
        Self { ops, outcome }
    }
}

/// Clocks and policy that recency decisions depend on.
#[derive(Debug, Clone, Copy)]
pub struct MergeClock {
    /// Local wall clock, milliseconds.
    pub now: i64,
    /// The server's clock at fetch time.
    pub server_now: ServerTimestamp,
    pub tie_break: TieBreak,
}

impl MergeClock {
    fn local_age(&self, local_modified: i64) -> Duration {
        u64::try_from(self.now.saturating_sub(local_modified))
            .map(Duration::from_millis)
            .unwrap_or_default()
    }

    fn remote_age(&self, modified: ServerTimestamp) -> Duration {
        self.server_now.duration_since(modified).unwrap_or_default()
    }

    /// Which side changed last: the local row, modified at `local_modified`
    /// by the local clock, or the remote one, modified at `remote_modified`
    /// by the server's. Ages are compared so the two clocks never mix.
    #[must_use]
    pub fn newer_by_age(&self, local_modified: i64, remote_modified: ServerTimestamp) -> Side {
        let local_age = self.local_age(local_modified);
        let remote_age = self.remote_age(remote_modified);
        // Younger is newer.
        self.tie_break.newer(remote_age.cmp(&local_age))
    }

    /// Which password is newer, by `time_password_changed`.
    #[must_use]
    pub fn newer_password(&self, local: &Login, remote: &Login) -> Side {
        self.tie_break
            .newer(local.password_changed_at().cmp(&remote.password_changed_at()))
    }
}

/// Inbound tombstone: the record goes away everywhere.
#[must_use]
pub fn plan_delete(id: &Guid) -> Plan {
    Plan::new(
        Outcome::Applied,
        vec![SyncOp::DeleteLocal(id.clone()), SyncOp::DeleteMirror(id.clone())],
    )
}

/// Only the mirror has the record: fast-forward it. With no local row there
/// is nothing left to override it.
#[must_use]
pub fn plan_mirror_update(upstream: Login, modified: ServerTimestamp) -> Plan {
    Plan::new(
        Outcome::Applied,
        vec![SyncOp::UpdateMirror {
            login: upstream,
            server_modified: modified,
            is_overridden: Some(false),
        }],
    )
}

/// Never seen before and no duplicate: store it as synced.
#[must_use]
pub fn plan_mirror_insert(upstream: Login, modified: ServerTimestamp) -> Plan {
    Plan::new(
        Outcome::Applied,
        vec![SyncOp::InsertMirror {
            login: upstream,
            server_modified: modified,
            is_overridden: false,
        }],
    )
}

/// Local changes on top of a mirror row that also changed upstream.
#[must_use]
pub fn plan_three_way_merge(
    local: &Login,
    local_modified: i64,
    mirror: &MirrorRow,
    upstream: Login,
    modified: ServerTimestamp,
    clock: &MergeClock,
) -> Plan {
    let precedence = Precedence {
        password: clock.newer_password(local, &upstream),
        other: clock.newer_by_age(local_modified, modified),
    };
    let merged = three_way_merge(&mirror.login, local, &upstream, precedence);
    Plan::new(
        Outcome::Reconciled,
        vec![
            SyncOp::UpdateMirror {
                login: upstream,
                server_modified: modified,
                is_overridden: None,
            },
            SyncOp::UpdateLocal { login: merged },
        ],
    )
}

/// A local record with no shared parent. Whichever password changed last
/// wins outright.
#[must_use]
pub fn plan_two_way_merge(
    local: &Login,
    upstream: Login,
    modified: ServerTimestamp,
    clock: &MergeClock,
) -> Plan {
    let local_wins = clock.newer_password(local, &upstream) == Side::Local;
    let id = local.guid().clone();
    let mut ops = vec![SyncOp::InsertMirror {
        login: upstream,
        server_modified: modified,
        is_overridden: local_wins,
    }];
    if !local_wins {
        ops.push(SyncOp::DeleteLocal(id));
    }
    Plan::new(Outcome::Reconciled, ops)
}

/// Deleted locally, changed upstream. The deletion survives only if it is
/// more recent than the remote change.
#[must_use]
pub fn plan_local_tombstone(
    local_modified: i64,
    mirror: Option<&MirrorRow>,
    upstream: Login,
    modified: ServerTimestamp,
    clock: &MergeClock,
) -> Plan {
    let keep_deletion = clock.newer_by_age(local_modified, modified) == Side::Local;
    let id = upstream.guid().clone();
    let mirror_op = |is_overridden: bool| match mirror {
        Some(_) => SyncOp::UpdateMirror {
            login: upstream,
            server_modified: modified,
            is_overridden: Some(is_overridden),
        },
        None => SyncOp::InsertMirror {
            login: upstream,
            server_modified: modified,
            is_overridden,
        },
    };
    let ops = if keep_deletion {
        vec![mirror_op(true)]
    } else {
        vec![SyncOp::DeleteLocal(id), mirror_op(false)]
    };
    Plan::new(Outcome::Reconciled, ops)
}

/// Incoming record with a new id, but an existing record `dupe` has the
/// same target and username. One of the two ids is retired.
#[must_use]
pub fn plan_same_username_dupe(
    dupe: &Login,
    dupe_is_synced: bool,
    upstream: Login,
    modified: ServerTimestamp,
    clock: &MergeClock,
) -> Plan {
    let remote_wins = clock.newer_password(dupe, &upstream) == Side::Remote;
    let incoming_id = upstream.guid().clone();
    let ops = if remote_wins {
        let retire_dupe = if dupe_is_synced {
            SyncOp::InsertLocalTombstone(dupe.guid().clone())
        } else {
            SyncOp::DeleteLocal(dupe.guid().clone())
        };
        vec![
            SyncOp::InsertMirror {
                login: upstream,
                server_modified: modified,
                is_overridden: false,
            },
            retire_dupe,
        ]
    } else {
        collapse_incoming(upstream, modified, incoming_id)
    };
    Plan::new(Outcome::Reconciled, ops)
}

/// Incoming record sharing only the site (origin plus realm or form action)
/// with an existing record `dupe`. The existing record stays and keeps its
/// username; if the incoming change is newer its password and form details
/// are folded in. The incoming id is retired either way.
#[must_use]
pub fn plan_dedupe(dupe: &Login, upstream: Login, modified: ServerTimestamp, clock: &MergeClock) -> Plan {
    let mut ops = Vec::with_capacity(3);
    if clock.newer_password(dupe, &upstream) == Side::Remote {
        let mut merged = dupe.clone();
        merged.sec_fields.password = upstream.sec_fields.password.clone();
        merged.fields.username_field = upstream.fields.username_field.clone();
        merged.fields.password_field = upstream.fields.password_field.clone();
        merged.record.time_password_changed = upstream.password_changed_at();
        merged.record.time_last_used = merged.record.time_last_used.max(upstream.record.time_last_used);
        merged.record.times_used = merged.record.times_used.max(upstream.record.times_used);
        ops.push(SyncOp::UpdateLocal { login: merged });
    }
    let incoming_id = upstream.guid().clone();
    ops.extend(collapse_incoming(upstream, modified, incoming_id));
    Plan::new(Outcome::Reconciled, ops)
}

/// Keeps the incoming record out of the visible set and queues its deletion
/// upstream.
fn collapse_incoming(upstream: Login, modified: ServerTimestamp, id: Guid) -> Vec<SyncOp> {
    vec![
        SyncOp::InsertMirror {
            login: upstream,
            server_modified: modified,
            is_overridden: true,
        },
        SyncOp::InsertLocalTombstone(id),
    ]
}
