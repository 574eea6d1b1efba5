//! Administrator invitations
//!
//! An opt-in pass after every migrate and assign tier: each super user named
//! in the run selection is invited into the destination organization with
//! org-wide admin privileges. Invitations never depend on other steps.

use crate::assignment::failure;
use crate::error::EngineError;
use crate::executor::{compose, RunContext};
use crate::ledger::{Mode, StepStatus};
use crate::plan::{Action, MigrationStep, StepKey};
use crate::selection::SuperUser;
use orgclone_catalog::ResourceKind;
use std::collections::BTreeSet;
use tracing::debug;

/// One invite step per super user, in selection order
#[must_use]
pub fn plan_invites(super_users: &[SuperUser]) -> Vec<MigrationStep> {
    super_users
        .iter()
        .map(|user| MigrationStep {
            key: StepKey::invite(&user.email),
            name: user.email.clone(),
            action: Action::Invite,
            depends_on: BTreeSet::new(),
            parent: None,
            skip_reason: None,
            assignment: None,
        })
        .collect()
}

/// Send (or, in preflight, describe) the invitation for `step`
pub(crate) async fn execute(ctx: &RunContext, step: &MigrationStep) -> Result<(), EngineError> {
    let email = step.key.source_id.as_str();
    let Some(user) = ctx.selection.super_user(email) else {
        ctx.record(step, StepStatus::Failed, None, format!("'{email}' is not in the run selection"));
        return Ok(());
    };
    let lead = |verb: &str| format!("{verb} '{email}' as org super user");
    let reason = |verb: &str| match ctx.catalog.get(ResourceKind::SuperUser) {
        Some(descriptor) => compose(&lead(verb), &[], descriptor),
        None => lead(verb),
    };

    match ctx.mode {
        Mode::Simulated => ctx.record(step, StepStatus::Succeeded, None, reason("would invite")),
        Mode::Mutating => {
            let (result, stats) = ctx
                .guard
                .call(|| ctx.destination.invite_admin(user.invite_payload()))
                .await;
            match result {
                Ok(()) => ctx.record(step, StepStatus::Succeeded, None, reason("invited")),
                Err(e) if e.is_already_exists() => {
                    debug!(email, "invitee already present");
                    ctx.record(
                        step,
                        StepStatus::SkippedExists,
                        None,
                        format!("'{email}' already has access or a pending invitation"),
                    );
                }
                Err(e) => ctx.record(step, StepStatus::Failed, None, failure(&e, stats.attempts)),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Stage;

    #[test]
    fn one_independent_step_per_invitee() {
        let steps = plan_invites(&[
            SuperUser::new("ops@example.com"),
            SuperUser::new("lee@example.com").named("Lee", "Park"),
        ]);
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|step| step.depends_on.is_empty()));
        assert_eq!(steps[0].key.stage, Stage::Invite);
        assert_eq!(steps[0].key.kind, ResourceKind::SuperUser);
        assert_eq!(steps[1].key.to_string(), "invite lee@example.com");
        assert_eq!(steps[1].action, Action::Invite);
    }
}
