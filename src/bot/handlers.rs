//! Bot command handlers.
//!
//! Admin commands bind the marketplace topic and report chat, manage
//! cooldowns and the XP ledger. User commands cover profiles, the
//! leaderboard and reports to the administration.

use crate::config::{self, DAILY_XP_CAP};
use crate::moderation::cooldown::{parse_duration, CooldownScope};
use crate::xp::{Profile, Rank};
use std::sync::Arc;
use teloxide::types::{Message, User};
use teloxide::utils::command::BotCommands;
use tracing::error;

use super::BotDeps;

/// All supported slash commands.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "snake_case", description = "Доступні команди:")]
pub enum Command {
    /// Mark the current topic as the moderated marketplace.
    #[command(description = "позначити цю тему як барахолку")]
    ResaleTopic,
    /// Post the marketplace rules.
    #[command(description = "опублікувати правила барахолки")]
    Notification,
    /// Receive `/report` forwards in the current chat.
    #[command(description = "приймати скарги в цей чат")]
    ReportChat,
    /// `/reset_cooldown <user> [buy|sell|all]`
    #[command(description = "скинути кулдаун користувача")]
    ResetCooldown(String),
    /// `/set_cooldown <user> <30m|2h|1d> [buy|sell|all]`
    #[command(description = "встановити власний кулдаун")]
    SetCooldown(String),
    /// `/report <текст>`
    #[command(description = "поскаржитися адміністрації")]
    Report(String),
    /// Show the caller's XP profile.
    #[command(description = "ваш профіль")]
    Profile,
    /// `/top [N]`
    #[command(description = "топ учасників за XP")]
    Top(String),
    /// `/add_xp <user> <кількість> [причина]`
    #[command(description = "нарахувати XP")]
    AddXp(String),
    /// `/remove_xp <user> <кількість> [причина]`
    #[command(description = "зняти XP")]
    RemoveXp(String),
    /// `/set_xp <user> <кількість> [причина]`
    #[command(description = "встановити XP")]
    SetXp(String),
    /// `/set_rank <user> <ранг>`
    #[command(description = "встановити ранг")]
    SetRank(String),
    /// `/reset_xp <user>`
    #[command(description = "скинути XP користувача")]
    ResetXp(String),
}

/// Command endpoint. Errors are handled inside each command.
///
/// # Errors
///
/// Never fails; the signature matches the dispatcher contract.
pub async fn dispatch_command(
    msg: Message,
    cmd: Command,
    deps: Arc<BotDeps>,
) -> anyhow::Result<()> {
    let Some(from) = msg.from.clone() else {
        return Ok(());
    };
    let caller_id = from.id.0.cast_signed();

    match cmd {
        Command::ResaleTopic => bind_resale_topic(&deps, &msg, caller_id).await,
        Command::Notification => post_rules(&deps, &msg, caller_id).await,
        Command::ReportChat => bind_report_chat(&deps, &msg, caller_id).await,
        Command::ResetCooldown(args) => reset_cooldown(&deps, &msg, caller_id, &args).await,
        Command::SetCooldown(args) => set_cooldown(&deps, &msg, caller_id, &args).await,
        Command::Report(text) => forward_report(&deps, &msg, &from, &text).await,
        Command::Profile => show_profile(&deps, &msg, caller_id).await,
        Command::Top(args) => show_top(&deps, &msg, &args).await,
        Command::AddXp(args) => adjust_xp(&deps, &msg, caller_id, &args, 1).await,
        Command::RemoveXp(args) => adjust_xp(&deps, &msg, caller_id, &args, -1).await,
        Command::SetXp(args) => set_xp(&deps, &msg, caller_id, &args).await,
        Command::SetRank(args) => set_rank(&deps, &msg, caller_id, &args).await,
        Command::ResetXp(args) => reset_xp(&deps, &msg, caller_id, &args).await,
    }
    Ok(())
}

async fn bind_resale_topic(deps: &BotDeps, msg: &Message, caller_id: i64) {
    if !ensure_admin(deps, msg, caller_id).await {
        return;
    }
    let binding = (msg.chat.id.0, msg.thread_id.map(|t| t.0 .0));
    *deps.state.resale_topic.write().await = Some(binding);
    reply(deps, msg, "✅ Цю тему позначено як барахолку.").await;
}

async fn post_rules(deps: &BotDeps, msg: &Message, caller_id: i64) {
    if !ensure_admin(deps, msg, caller_id).await {
        return;
    }
    reply_html(deps, msg, &rules_text()).await;
}

async fn bind_report_chat(deps: &BotDeps, msg: &Message, caller_id: i64) {
    if !ensure_admin(deps, msg, caller_id).await {
        return;
    }
    *deps.state.report_chat.write().await = Some(msg.chat.id.0);
    reply(deps, msg, "✅ Скарги надходитимуть у цей чат.").await;
}

async fn reset_cooldown(deps: &BotDeps, msg: &Message, caller_id: i64, args: &str) {
    if !ensure_admin(deps, msg, caller_id).await {
        return;
    }
    let parts: Vec<&str> = args.split_whitespace().collect();
    let Some(user_token) = parts.first() else {
        reply(deps, msg, "Використання: /reset_cooldown <user> [buy|sell|all]").await;
        return;
    };
    let Some(user_id) = resolve_user(deps, user_token) else {
        reply(deps, msg, "❌ Користувача не знайдено.").await;
        return;
    };
    let scope = parts
        .get(1)
        .and_then(|s| s.parse::<CooldownScope>().ok())
        .unwrap_or(CooldownScope::All);
    if deps.ctx.cooldowns.reset(user_id, scope) {
        persist_cooldowns(deps).await;
        reply(deps, msg, "✅ Кулдаун скинуто.").await;
    } else {
        reply(deps, msg, "У користувача немає активного кулдауну.").await;
    }
}

async fn set_cooldown(deps: &BotDeps, msg: &Message, caller_id: i64, args: &str) {
    if !ensure_admin(deps, msg, caller_id).await {
        return;
    }
    let parts: Vec<&str> = args.split_whitespace().collect();
    let (Some(user_token), Some(duration_token)) = (parts.first(), parts.get(1)) else {
        reply(
            deps,
            msg,
            "Використання: /set_cooldown <user> <30m|2h|1d> [buy|sell|all]",
        )
        .await;
        return;
    };
    let Some(user_id) = resolve_user(deps, user_token) else {
        reply(deps, msg, "❌ Користувача не знайдено.").await;
        return;
    };
    let Some(seconds) = parse_duration(duration_token) else {
        reply(deps, msg, "❌ Невірний формат тривалості, приклад: 30m, 2h, 1d.").await;
        return;
    };
    let scope = parts
        .get(2)
        .and_then(|s| s.parse::<CooldownScope>().ok())
        .unwrap_or(CooldownScope::All);
    deps.ctx.cooldowns.set_custom_window(user_id, scope, seconds);
    persist_cooldowns(deps).await;
    reply(deps, msg, "✅ Власний кулдаун встановлено.").await;
}

async fn forward_report(deps: &BotDeps, msg: &Message, from: &User, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        reply(deps, msg, "Використання: /report <опис проблеми>").await;
        return;
    }
    let target = *deps.state.report_chat.read().await;
    let Some(report_chat) = target else {
        reply(deps, msg, "❌ Прийом скарг ще не налаштовано.").await;
        return;
    };
    let mention = from
        .username
        .as_ref()
        .map_or_else(|| from.first_name.clone(), |u| format!("@{u}"));
    let forwarded = format!(
        "🚨 Скарга від {mention} (id {}):\n{text}",
        from.id.0.cast_signed()
    );
    match deps
        .ctx
        .transport
        .send_to_thread(report_chat, None, &forwarded)
        .await
    {
        Ok(_) => reply(deps, msg, "✅ Вашу скаргу надіслано адміністрації.").await,
        Err(e) => {
            error!("failed to forward report: {e}");
            reply(deps, msg, "❌ Не вдалося надіслати скаргу, спробуйте пізніше.").await;
        }
    }
}

async fn show_profile(deps: &BotDeps, msg: &Message, caller_id: i64) {
    match deps.ctx.xp.profile(caller_id) {
        Some(profile) => reply_html(deps, msg, &render_profile(&profile)).await,
        None => reply(deps, msg, "У вас ще немає профілю, напишіть щось у чат!").await,
    }
}

async fn show_top(deps: &BotDeps, msg: &Message, args: &str) {
    let limit = args.trim().parse::<usize>().map_or(10, |n| n.clamp(1, 25));
    let top = deps.ctx.xp.leaderboard(limit);
    reply_html(deps, msg, &render_leaderboard(&top)).await;
}

async fn adjust_xp(deps: &BotDeps, msg: &Message, caller_id: i64, args: &str, sign: i64) {
    if !ensure_admin(deps, msg, caller_id).await {
        return;
    }
    let usage = if sign > 0 {
        "Використання: /add_xp <user> <кількість> [причина]"
    } else {
        "Використання: /remove_xp <user> <кількість> [причина]"
    };
    let parts: Vec<&str> = args.split_whitespace().collect();
    let (Some(user_token), Some(amount_token)) = (parts.first(), parts.get(1)) else {
        reply(deps, msg, usage).await;
        return;
    };
    let (Some(user_id), Ok(amount)) = (resolve_user(deps, user_token), amount_token.parse::<i64>())
    else {
        reply(deps, msg, "❌ Невірні аргументи.").await;
        return;
    };
    if amount <= 0 {
        reply(deps, msg, "❌ Кількість має бути додатною.").await;
        return;
    }
    let reason = if parts.len() > 2 {
        parts[2..].join(" ")
    } else if sign > 0 {
        "XP нараховано адміністратором".to_string()
    } else {
        "XP знято адміністратором".to_string()
    };
    match deps
        .ctx
        .xp
        .admin_adjust_xp(user_id, sign * amount, caller_id, &reason)
        .await
    {
        Some(xp) => reply(deps, msg, &format!("✅ Тепер у користувача {xp} XP.")).await,
        None => reply(deps, msg, "❌ Користувача не знайдено.").await,
    }
}

async fn set_xp(deps: &BotDeps, msg: &Message, caller_id: i64, args: &str) {
    if !ensure_admin(deps, msg, caller_id).await {
        return;
    }
    let parts: Vec<&str> = args.split_whitespace().collect();
    let (Some(user_token), Some(amount_token)) = (parts.first(), parts.get(1)) else {
        reply(deps, msg, "Використання: /set_xp <user> <кількість> [причина]").await;
        return;
    };
    let (Some(user_id), Ok(amount)) = (resolve_user(deps, user_token), amount_token.parse::<u32>())
    else {
        reply(deps, msg, "❌ Невірні аргументи.").await;
        return;
    };
    let reason = if parts.len() > 2 {
        parts[2..].join(" ")
    } else {
        "XP встановлено адміністратором".to_string()
    };
    match deps
        .ctx
        .xp
        .admin_set_xp(user_id, amount, caller_id, &reason)
        .await
    {
        Some(xp) => reply(deps, msg, &format!("✅ Встановлено {xp} XP.")).await,
        None => reply(deps, msg, "❌ Користувача не знайдено.").await,
    }
}

async fn set_rank(deps: &BotDeps, msg: &Message, caller_id: i64, args: &str) {
    if !ensure_admin(deps, msg, caller_id).await {
        return;
    }
    let mut parts = args.split_whitespace();
    let Some(user_token) = parts.next() else {
        reply(deps, msg, "Використання: /set_rank <user> <ранг>").await;
        return;
    };
    let rank_name = parts.collect::<Vec<_>>().join(" ");
    if rank_name.is_empty() {
        reply(deps, msg, "Використання: /set_rank <user> <ранг>").await;
        return;
    }
    let Some(user_id) = resolve_user(deps, user_token) else {
        reply(deps, msg, "❌ Користувача не знайдено.").await;
        return;
    };
    let rank = Rank::from(rank_name);
    if deps.ctx.xp.admin_set_rank(user_id, rank.clone(), caller_id).await {
        reply(
            deps,
            msg,
            &format!("✅ Ранг встановлено: {} {}", rank.emoji(), rank.name()),
        )
        .await;
    } else {
        reply(deps, msg, "❌ Користувача не знайдено.").await;
    }
}

async fn reset_xp(deps: &BotDeps, msg: &Message, caller_id: i64, args: &str) {
    if !ensure_admin(deps, msg, caller_id).await {
        return;
    }
    let Some(user_id) = args.split_whitespace().next().and_then(|t| resolve_user(deps, t)) else {
        reply(deps, msg, "Використання: /reset_xp <user>").await;
        return;
    };
    if deps.ctx.xp.admin_reset(user_id, caller_id).await {
        reply(deps, msg, "✅ XP скинуто.").await;
    } else {
        reply(deps, msg, "❌ Користувача не знайдено.").await;
    }
}

async fn reply(deps: &BotDeps, msg: &Message, text: &str) {
    if let Err(e) = deps
        .ctx
        .transport
        .send_to_thread(msg.chat.id.0, msg.thread_id.map(|t| t.0 .0), text)
        .await
    {
        error!("failed to reply: {e}");
    }
}

async fn reply_html(deps: &BotDeps, msg: &Message, text: &str) {
    if let Err(e) = deps
        .ctx
        .transport
        .send_html(msg.chat.id.0, msg.thread_id.map(|t| t.0 .0), text)
        .await
    {
        error!("failed to reply: {e}");
    }
}

async fn ensure_admin(deps: &BotDeps, msg: &Message, user_id: i64) -> bool {
    if deps
        .admins
        .is_admin(deps.ctx.transport.as_ref(), msg.chat.id.0, user_id)
        .await
    {
        return true;
    }
    reply(deps, msg, "❌ Ця команда доступна тільки адміністраторам.").await;
    false
}

/// Resolve a numeric id or `@username` against the XP ledger.
fn resolve_user(deps: &BotDeps, token: &str) -> Option<i64> {
    if let Ok(id) = token.parse::<i64>() {
        return Some(id);
    }
    deps.ctx.xp.find_by_username(token.trim_start_matches('@'))
}

fn rules_text() -> String {
    format!(
        "📋 <b>Правила барахолки</b>\n\n\
         1. Оголошення про продаж публікуються з хештегом #продам, про купівлю — з #куплю.\n\
         2. Мінімальна ціна продажу: {} грн. Для одягу (хештег #одяг): {} грн.\n\
         3. Вказуйте ціну у форматі «ціна: 3500 грн».\n\
         4. Одне оголошення на категорію раз на 12 годин.\n\
         5. Стікери та медіа без опису видаляються.\n\n\
         Порушення видаляються автоматично.",
        config::get_min_price(),
        config::get_clothing_min_price()
    )
}

fn render_profile(profile: &Profile) -> String {
    let name = html_escape::encode_text(&profile.first_name).to_string();
    let rank_name = html_escape::encode_text(profile.rank.name()).to_string();
    let mut out = format!(
        "👤 <b>{name}</b>\n\
         {} Ранг: <b>{rank_name}</b>\n\
         ⭐ XP: <b>{}</b>\n\
         📅 Сьогодні: {}/{DAILY_XP_CAP}",
        profile.rank.emoji(),
        profile.xp,
        profile.daily_xp,
    );
    if let Some(next) = &profile.next {
        out.push_str(&format!(
            "\n⬆️ До рангу «{}» залишилось {} XP",
            next.rank.name(),
            next.xp_needed
        ));
    }
    out
}

fn render_leaderboard(top: &[Profile]) -> String {
    if top.is_empty() {
        return "Поки що ніхто не заробив XP.".to_string();
    }
    let mut out = String::from("🏆 <b>Топ учасників</b>\n");
    for (place, profile) in top.iter().enumerate() {
        let medal = match place {
            0 => "🥇",
            1 => "🥈",
            2 => "🥉",
            _ => "▪️",
        };
        let name = profile
            .username
            .as_ref()
            .map_or_else(|| profile.first_name.clone(), |u| format!("@{u}"));
        out.push_str(&format!(
            "{medal} {} — {} XP ({})\n",
            html_escape::encode_text(&name),
            profile.xp,
            profile.rank.name()
        ));
    }
    out
}

async fn persist_cooldowns(deps: &BotDeps) {
    if let Err(e) = deps
        .ctx
        .store
        .save_cooldowns(&deps.ctx.cooldowns.snapshot())
        .await
    {
        error!("failed to persist cooldowns: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaderboard_rendering_handles_empty_and_medals() {
        assert_eq!(render_leaderboard(&[]), "Поки що ніхто не заробив XP.");

        let top: Vec<Profile> = (0..4)
            .map(|i| Profile {
                user_id: i,
                username: Some(format!("user{i}")),
                first_name: "Тест".to_string(),
                xp: 100 - u32::try_from(i).unwrap_or(0),
                rank: Rank::Member,
                daily_xp: 0,
                next: None,
            })
            .collect();
        let rendered = render_leaderboard(&top);
        assert!(rendered.contains("🥇 @user0"));
        assert!(rendered.contains("🥉 @user2"));
        assert!(rendered.contains("▪️ @user3"));
    }

    #[test]
    fn profile_rendering_escapes_html() {
        let profile = Profile {
            user_id: 1,
            username: None,
            first_name: "<b>Іван</b>".to_string(),
            xp: 10,
            rank: Rank::Novice,
            daily_xp: 3,
            next: Some(crate::xp::NextRank {
                rank: Rank::Member,
                threshold: 50,
                xp_needed: 40,
            }),
        };
        let rendered = render_profile(&profile);
        assert!(rendered.contains("&lt;b&gt;Іван&lt;/b&gt;"));
        assert!(rendered.contains("залишилось 40 XP"));
    }

    #[test]
    fn rules_mention_both_price_floors() {
        let rules = rules_text();
        assert!(rules.contains("3000"));
        assert!(rules.contains("1000"));
    }
}
