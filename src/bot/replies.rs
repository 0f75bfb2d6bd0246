//! User-facing reply texts.

use crate::error::LedgerError;
use crate::models::{ACCOUNT_COST, AllocationResult, GeneratedCode, ImportReport, ImportStatus};

pub fn welcome(name: &str, channel: &str) -> String {
    format!(
        "Welcome {name}! 🎉\n\n\
         1️⃣ Redeem a code: /redeem <code>\n\
         2️⃣ Check your balance: /balance\n\
         3️⃣ Get an account: /get (each account costs {ACCOUNT_COST} points)\n\
         4️⃣ Stay updated: {channel}"
    )
}

pub fn not_member(channel: &str) -> String {
    format!("You are not a member of {channel}. Join the channel to use the bot.")
}

pub fn not_authorized() -> String {
    "You are not authorized to use this command.".to_string()
}

pub fn usage(usage: &str) -> String {
    format!("Usage: {usage}")
}

pub fn unknown_command(name: &str) -> String {
    format!("Unknown command /{name}.")
}

pub fn redeemed(points: u64, balance: u64) -> String {
    format!("Code redeemed! You got {points} points. Your balance is now {balance} points.")
}

pub fn balance(points: u64) -> String {
    format!("Your current balance is: {points} points.")
}

pub fn no_user_yet() -> String {
    "You don't have a balance yet. Send /start to begin.".to_string()
}

pub fn allocated(result: &AllocationResult, channel: &str) -> String {
    let (login, secret) = result.login_and_secret();
    format!(
        "Congratulations 🎉 you have redeemed an account.\n\n\
         Login: {login}\n\
         Password: {secret}\n\n\
         Remaining balance: {} points. Join {channel} ✅",
        result.remaining_balance
    )
}

pub fn code_added(code: &str) -> String {
    format!("Code {code} added successfully!")
}

/// Announcement sent to the admin and broadcast to every user.
pub fn generated_codes(codes: &[GeneratedCode]) -> String {
    let mut message = format!("{} redeem code(s) generated! 🎉\n\n", codes.len());
    for code in codes {
        message.push_str(&format!("Code: {} | Points: {}\n", code.code, code.points));
    }
    message.push_str("\nRedeem with /redeem <code>");
    message
}

pub fn import_report(report: &ImportReport) -> String {
    let mut lines: Vec<String> = report
        .entries
        .iter()
        .map(|entry| match (entry.status, entry.account_id.as_deref()) {
            (ImportStatus::Added, Some(id)) => format!("Account {id} added."),
            (ImportStatus::AlreadyExists, Some(id)) => format!("Account {id} already exists."),
            _ => format!("Skipped malformed entry {:?} (expected login:secret).", entry.entry),
        })
        .collect();
    lines.push(format!(
        "{} added, {} already existing, {} malformed.",
        report.count(ImportStatus::Added),
        report.count(ImportStatus::AlreadyExists),
        report.count(ImportStatus::Malformed)
    ));
    lines.join("\n")
}

pub fn broadcast_armed() -> String {
    "Broadcast mode enabled. Send the message you want to broadcast to all users.".to_string()
}

pub fn broadcast_sent(delivered: usize, failed: usize) -> String {
    format!(
        "Broadcast delivered to {delivered} user(s), {failed} failed. Broadcast mode is now disabled."
    )
}

pub fn ledger_error(err: &LedgerError) -> String {
    match err {
        LedgerError::InvalidCode => "Invalid code!".to_string(),
        LedgerError::AlreadyUsed => "Code already used!".to_string(),
        LedgerError::InsufficientPoints { balance, required } => format!(
            "Not enough points! Each account costs {required} points, you have {balance}."
        ),
        LedgerError::PoolEmpty => "No accounts available right now!".to_string(),
        LedgerError::AlreadyExists(what) => format!("{what} already exists!"),
        LedgerError::MalformedEntry(detail) => format!("Malformed entry: {detail}"),
        LedgerError::NotAuthorized => not_authorized(),
        LedgerError::InvalidInput(detail) => format!("Invalid input: {detail}"),
        LedgerError::StoreUnavailable(_) => {
            "The service is temporarily unavailable, please try again later.".to_string()
        }
        LedgerError::CorruptRecord(_) => {
            "Something is wrong with your records, please contact an admin.".to_string()
        }
    }
}
