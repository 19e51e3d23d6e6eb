//! The per-message pipeline: XP accrual, topic gating, album routing and
//! moderation of settled submissions.

use crate::bot::warnings::WarningService;
use crate::moderation::media_group::AddOutcome;
use crate::moderation::policy::{ModerationPolicy, Submission, Verdict};
use crate::moderation::CooldownLedger;
use crate::storage::JsonStore;
use crate::transport::{ChatTransport, MessageRef};
use crate::xp::{UserIdentity, XpLedger};
use std::sync::Arc;
use teloxide::types::Message;
use tracing::{error, info};

use super::BotDeps;

/// Shared services needed to moderate one submission, whether it arrives
/// straight from a message handler or from the media-group channel.
pub struct ModerationContext {
    /// Chat transport used for deletions and warnings
    pub transport: Arc<dyn ChatTransport>,
    /// The rulebook
    pub policy: Arc<ModerationPolicy>,
    /// Warning poster
    pub warnings: Arc<WarningService>,
    /// XP ledger, source of author ranks
    pub xp: Arc<XpLedger>,
    /// Cooldown ledger, persisted after accepted posts
    pub cooldowns: Arc<CooldownLedger>,
    /// JSON store for cooldown snapshots
    pub store: Arc<JsonStore>,
}

/// Evaluate one submission and act on the verdict.
pub async fn moderate_submission(ctx: &ModerationContext, submission: Submission) {
    let rank = ctx.xp.rank_of(submission.user_id);
    match ctx.policy.evaluate_and_record(&submission, &rank) {
        Verdict::Accepted { category } => {
            info!(
                user_id = submission.user_id,
                category = category.as_str(),
                "submission accepted"
            );
            if let Err(e) = ctx.store.save_cooldowns(&ctx.cooldowns.snapshot()).await {
                error!("failed to persist cooldowns: {e}");
            }
        }
        Verdict::Rejected(violation) => {
            info!(
                user_id = submission.user_id,
                ?violation,
                "submission rejected"
            );
            ctx.warnings
                .enforce(&ctx.transport, &submission, &violation)
                .await;
        }
    }
}

fn submission_from(msg: &Message, who: &UserIdentity) -> Submission {
    Submission {
        chat_id: msg.chat.id.0,
        thread_id: msg.thread_id.map(|t| t.0 .0),
        user_id: who.user_id,
        username: who.username.clone(),
        first_name: who.first_name.clone(),
        text: msg
            .text()
            .or_else(|| msg.caption())
            .unwrap_or_default()
            .to_string(),
        has_sticker: msg.sticker().is_some(),
        messages: vec![MessageRef {
            chat_id: msg.chat.id.0,
            message_id: msg.id.0,
        }],
    }
}

/// Non-command message endpoint.
///
/// # Errors
///
/// Never fails; the signature matches the dispatcher contract.
pub async fn dispatch_message(msg: Message, deps: Arc<BotDeps>) -> anyhow::Result<()> {
    let Some(from) = msg.from.clone() else {
        return Ok(());
    };
    if from.is_bot {
        return Ok(());
    }

    let who = UserIdentity {
        user_id: from.id.0.cast_signed(),
        username: from.username.clone(),
        first_name: from.first_name.clone(),
    };
    let text = msg.text().or_else(|| msg.caption()).unwrap_or_default();
    // Recognized commands go to the command branch; unknown ones earn
    // nothing either.
    if text.starts_with('/') {
        return Ok(());
    }

    // Every ordinary chat message may earn XP, topic or not.
    if let Some(outcome) = deps.ctx.xp.process_message(&who, text).await {
        if let Some(promotion) = outcome.promotion {
            let mention = from
                .username
                .as_ref()
                .map_or_else(|| from.first_name.clone(), |u| format!("@{u}"));
            let congrats = format!(
                "🎉 Вітаємо, {mention}! Ви досягли нового рангу: {} {}",
                promotion.new_rank.emoji(),
                promotion.new_rank.name()
            );
            if let Err(e) = deps
                .ctx
                .transport
                .send_to_thread(msg.chat.id.0, msg.thread_id.map(|t| t.0 .0), &congrats)
                .await
            {
                error!("failed to announce promotion: {e}");
            }
        }
    }

    // Marketplace rules apply only inside the designated topic.
    let monitored = *deps.state.resale_topic.read().await;
    let Some((topic_chat, topic_thread)) = monitored else {
        return Ok(());
    };
    let chat_id = msg.chat.id.0;
    if chat_id != topic_chat || msg.thread_id.map(|t| t.0 .0) != topic_thread {
        return Ok(());
    }

    // Admin posts (pinned rules, announcements) are exempt.
    if deps
        .admins
        .is_admin(deps.ctx.transport.as_ref(), chat_id, who.user_id)
        .await
    {
        return Ok(());
    }

    let submission = submission_from(&msg, &who);
    if let Some(group_id) = msg.media_group_id().map(|g| g.0.clone()) {
        if deps.aggregator.add(&group_id, submission.clone()).await == AddOutcome::Buffered {
            return Ok(());
        }
        // Straggler after its album settled: moderate it standalone.
    }
    moderate_submission(&deps.ctx, submission).await;
    Ok(())
}
