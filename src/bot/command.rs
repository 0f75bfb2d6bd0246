//! Chat command parsing. Argument-count and number-format problems are usage errors and
//! never reach the ledger.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Redeem(String),
    GetAccount,
    Balance,
    AddCode { code: String, points: u64 },
    AddBulkAccounts(Vec<String>),
    GenerateCodes { count: u32, points: u64 },
    Broadcast,
    /// Any non-command message.
    Text(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Usage: {usage}")]
    Usage {
        usage: &'static str,
        admin_only: bool,
    },

    #[error("Unknown command: /{0}")]
    Unknown(String),
}

pub const REDEEM_USAGE: &str = "/redeem <code>";
pub const ADD_CODE_USAGE: &str = "/addcode <code> <points>";
pub const ADD_BULK_USAGE: &str = "/addbulkaccounts <login1>:<secret1> <login2>:<secret2> ...";
pub const GENERATE_USAGE: &str = "/generatecodes <number_of_codes> <points>";

impl Command {
    pub fn parse(text: &str) -> Result<Command, ParseError> {
        let text = text.trim();
        let Some(body) = text.strip_prefix('/') else {
            return Ok(Command::Text(text.to_string()));
        };

        let mut parts = body.split_whitespace();
        let head = parts.next().unwrap_or_default();
        // "/redeem@SomeBot" in group chats
        let name = head.split('@').next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = parts.collect();

        let usage = |usage: &'static str, admin_only: bool| ParseError::Usage { usage, admin_only };

        match name.as_str() {
            "start" => Ok(Command::Start),
            "get" => Ok(Command::GetAccount),
            "balance" => Ok(Command::Balance),
            "broadcast" => Ok(Command::Broadcast),
            "redeem" => match args.as_slice() {
                [code] => Ok(Command::Redeem(code.to_string())),
                _ => Err(usage(REDEEM_USAGE, false)),
            },
            "addcode" => match args.as_slice() {
                [code, points] => Ok(Command::AddCode {
                    code: code.to_string(),
                    points: positive(points).ok_or(usage(ADD_CODE_USAGE, true))?,
                }),
                _ => Err(usage(ADD_CODE_USAGE, true)),
            },
            "addbulkaccounts" => {
                if args.is_empty() {
                    Err(usage(ADD_BULK_USAGE, true))
                } else {
                    Ok(Command::AddBulkAccounts(
                        args.iter().map(|a| a.to_string()).collect(),
                    ))
                }
            }
            "generatecodes" => match args.as_slice() {
                [count, points] => {
                    let count = positive(count)
                        .and_then(|c| u32::try_from(c).ok())
                        .ok_or(usage(GENERATE_USAGE, true))?;
                    let points = positive(points).ok_or(usage(GENERATE_USAGE, true))?;
                    Ok(Command::GenerateCodes { count, points })
                }
                _ => Err(usage(GENERATE_USAGE, true)),
            },
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

fn positive(arg: &str) -> Option<u64> {
    arg.parse::<u64>().ok().filter(|n| *n > 0)
}
