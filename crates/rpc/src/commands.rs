//! CLI commands

use chrono::{Duration, Utc};
use coinledger_core::{AccountId, Balances, Coins};
use coinledger_grants::{GrantKind, NewGrant};
use coinledger_risk::RiskSignal;
use coinledger_settlement::{SettleRequest, SettleResponse};

use crate::context::AppContext;

fn print_balances(account: &AccountId, balances: &Balances) {
    println!("💰 {account}");
    println!("   free:      {}", balances.free);
    println!("   purchased: {}", balances.purchased);
    println!("   earned:    {}", balances.earned);
    println!(
        "   lifetime:  spent {}, earned {}",
        balances.total_spent, balances.total_earned
    );
}

/// Open an account with the signup bonus
pub async fn open(ctx: &AppContext, account: &AccountId) -> Result<(), anyhow::Error> {
    let (balances, created) = ctx.processor.open_account(account).await?;
    if created {
        println!("✅ Opened {account} with {} free coins", balances.free);
    } else {
        println!("ℹ️  {account} already exists");
    }
    print_balances(account, &balances);
    Ok(())
}

pub async fn balance(ctx: &AppContext, account: &AccountId) -> Result<(), anyhow::Error> {
    let balances = ctx.processor.balances(account).await?;
    print_balances(account, &balances);
    Ok(())
}

/// Settle one request and print the response
///
/// Rejections are printed, not returned as errors: they are a normal
/// settlement outcome.
pub async fn settle(ctx: &AppContext, request: &SettleRequest) -> Result<SettleResponse, anyhow::Error> {
    let response = ctx.settle(request).await;
    if response.is_committed() {
        println!("✅ {} committed", response.transaction_id);
    } else {
        println!(
            "❌ {} rejected: {}",
            response.transaction_id,
            response.message.as_deref().unwrap_or("unknown")
        );
    }
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(response)
}

/// Settle a raw JSON request body
pub async fn settle_json(ctx: &AppContext, body: &str) -> Result<SettleResponse, anyhow::Error> {
    let request: SettleRequest = serde_json::from_str(body)?;
    settle(ctx, &request).await
}

pub async fn freeze(
    ctx: &AppContext,
    account: &AccountId,
    reason: Option<String>,
    performed_by: &str,
) -> Result<(), anyhow::Error> {
    let profile = ctx.freeze(account, reason, performed_by).await?;
    println!("🧊 Frozen {account}");
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

pub async fn unfreeze(ctx: &AppContext, account: &AccountId, performed_by: &str) -> Result<(), anyhow::Error> {
    let profile = ctx.unfreeze(account, performed_by).await?;
    println!("✅ Unfrozen {account}");
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

pub async fn risk_signal(
    ctx: &AppContext,
    account: &AccountId,
    reason: &str,
    points: u64,
) -> Result<(), anyhow::Error> {
    let profile = ctx
        .raise_risk_score(account, RiskSignal::new(reason, points))
        .await?;
    println!(
        "⚠️  {account} risk score {}{}",
        profile.risk_score,
        if profile.is_frozen { " (frozen)" } else { "" }
    );
    Ok(())
}

pub async fn risk_overview(ctx: &AppContext, top: Option<usize>) -> Result<(), anyhow::Error> {
    let overview = match top {
        Some(n) => ctx.risk.overview(n).await?,
        None => ctx.risk_overview().await?,
    };
    println!("{}", serde_json::to_string_pretty(&overview)?);
    Ok(())
}

pub async fn draw(
    ctx: &AppContext,
    account: &AccountId,
    game_id: &str,
    draw_id: &str,
) -> Result<(), anyhow::Error> {
    let outcome = ctx.draw(account, game_id, draw_id, Utc::now()).await?;
    println!("🎡 {account} landed on {}", outcome.prize.label);
    if outcome.coins_won > 0 {
        println!("   won {} coins", outcome.coins_won);
    }
    if outcome.insurance_used {
        println!("   insurance absorbed the bankrupt");
    }
    if let Some(ref badge) = outcome.badge {
        println!("   badge awarded: {badge}");
    }
    if let Some(ref grant) = outcome.grant {
        println!("   {} grant {} until {}", grant.kind, grant.id, grant.ends_at);
    }
    if let Some(balances) = outcome.settlement.balances_of(account) {
        print_balances(account, balances);
    }
    Ok(())
}

/// Create a grant starting now
pub async fn grant(
    ctx: &AppContext,
    kind: GrantKind,
    subject: AccountId,
    minutes: i64,
    prize: Option<u64>,
) -> Result<(), anyhow::Error> {
    if minutes <= 0 {
        anyhow::bail!("grant duration must be positive, got {minutes} minutes");
    }
    let now = Utc::now();
    let mut new = NewGrant::new(kind, subject, now, now + Duration::minutes(minutes));
    if let Some(prize) = prize {
        new = new.with_prize(Coins::from(prize));
    }
    let grant = ctx.sweeper.create_grant(new).await?;
    println!("✅ Created {} grant {}", grant.kind, grant.id);
    println!("   ends at {}", grant.ends_at);
    Ok(())
}

pub async fn assign_winner(ctx: &AppContext, grant_id: &str, winner: &AccountId) -> Result<(), anyhow::Error> {
    let grant = ctx.sweeper.assign_winner(grant_id, winner).await?;
    println!("🏆 {winner} wins {} ({} coins)", grant.id, grant.prize);
    Ok(())
}

pub async fn sweep(ctx: &AppContext) -> Result<(), anyhow::Error> {
    let report = ctx.sweep(Utc::now()).await?;
    println!(
        "🧹 Swept: {} finalized, {} payouts, {} skipped, {} failed",
        report.processed,
        report.payouts.len(),
        report.already_finalized.len(),
        report.failures.len()
    );
    for (grant, reason) in &report.failures {
        println!("   ❌ {grant}: {reason}");
    }
    Ok(())
}

pub async fn journal(ctx: &AppContext, last: usize) -> Result<(), anyhow::Error> {
    let reader = ctx.journal()?;
    let (committed, rejected) = reader.status_counts()?;
    println!("📒 {committed} committed, {rejected} rejected");
    for record in reader.tail(last)? {
        println!(
            "   {} {:<10} {:<9} {:>10} {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.kind.to_string(),
            record.status.as_str(),
            record.amount.to_string(),
            record.transaction_id
        );
    }
    Ok(())
}
