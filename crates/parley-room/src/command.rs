//! Parsing chat text into commands.
//!
//! Text starting with `/` or `@` is a command; everything else is chat.
//!
//! ```text
//! /roll N | /roll NdM    /flip
//! /mute <name>           /unmute <name>
//! @<id> <text>           private message
//! /createroom <name>     /joinroom <name>     /listrooms [query]
//! /disconnect | /logoff | /logout
//! ```

use parley_protocol::ClientId;

use crate::CommandError;

/// Upper bounds on `/roll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiceLimits {
    pub max_rolls: u32,
    pub max_sides: u32,
}

impl DiceLimits {
    /// Checks a roll request against these limits.
    ///
    /// # Errors
    /// [`CommandError::InvalidDice`] for zero dice or sides,
    /// [`CommandError::DiceLimit`] when a bound is exceeded.
    pub fn check(&self, rolls: u32, sides: u32) -> Result<(), CommandError> {
        if rolls == 0 || sides == 0 {
            return Err(CommandError::InvalidDice(format!("{rolls}d{sides}")));
        }
        if rolls > self.max_rolls || sides > self.max_sides {
            return Err(CommandError::DiceLimit {
                max_rolls: self.max_rolls,
                max_sides: self.max_sides,
            });
        }
        Ok(())
    }
}

impl Default for DiceLimits {
    fn default() -> Self {
        Self {
            max_rolls: 100,
            max_sides: 1_000_000,
        }
    }
}

/// What a line of chat text asks the server to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ordinary text for the current room.
    Chat(String),
    Roll { rolls: u32, sides: u32 },
    Flip,
    Mute(String),
    Unmute(String),
    PrivateMessage { target: ClientId, text: String },
    CreateRoom(String),
    JoinRoom(String),
    ListRooms(String),
    Disconnect,
}

/// Parses one line of chat input.
///
/// # Errors
/// Returns a [`CommandError`] for a `/` or `@` line that isn't a
/// well-formed command.
pub fn parse(text: &str, limits: &DiceLimits) -> Result<Command, CommandError> {
    let line = text.trim();

    if let Some(rest) = line.strip_prefix('@') {
        return parse_private(rest);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Chat(text.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    match name.to_ascii_lowercase().as_str() {
        "roll" => parse_dice(arg, limits),
        "flip" => Ok(Command::Flip),
        "mute" => required(arg, "/mute <name>").map(Command::Mute),
        "unmute" => required(arg, "/unmute <name>").map(Command::Unmute),
        "createroom" => required(arg, "/createroom <name>").map(Command::CreateRoom),
        "joinroom" => required(arg, "/joinroom <name>").map(Command::JoinRoom),
        "listrooms" => Ok(Command::ListRooms(arg.to_string())),
        "disconnect" | "logoff" | "logout" => Ok(Command::Disconnect),
        _ => Err(CommandError::Unknown(name.to_string())),
    }
}

fn required(arg: &str, usage: &'static str) -> Result<String, CommandError> {
    if arg.is_empty() {
        Err(CommandError::MissingArgument(usage))
    } else {
        Ok(arg.to_string())
    }
}

fn parse_private(rest: &str) -> Result<Command, CommandError> {
    let (target, text) = match rest.split_once(char::is_whitespace) {
        Some((target, text)) => (target, text.trim()),
        None => (rest, ""),
    };
    let target = target
        .parse::<u64>()
        .map_err(|_| CommandError::InvalidTarget(target.to_string()))?;
    if text.is_empty() {
        return Err(CommandError::EmptyMessage);
    }
    Ok(Command::PrivateMessage {
        target: ClientId(target),
        text: text.to_string(),
    })
}

/// `N` is one N-sided die; `NdM` is N dice with M sides.
fn parse_dice(arg: &str, limits: &DiceLimits) -> Result<Command, CommandError> {
    let invalid = || CommandError::InvalidDice(arg.to_string());

    let (rolls, sides) = match arg.split_once(['d', 'D']) {
        Some((rolls, sides)) => (
            rolls.parse::<u32>().map_err(|_| invalid())?,
            sides.parse::<u32>().map_err(|_| invalid())?,
        ),
        None => (1, arg.parse::<u32>().map_err(|_| invalid())?),
    };
    if rolls == 0 || sides == 0 {
        return Err(invalid());
    }
    limits.check(rolls, sides)?;
    Ok(Command::Roll { rolls, sides })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> Result<Command, CommandError> {
        parse(text, &DiceLimits::default())
    }

    // =====================================================================
    // Chat passthrough
    // =====================================================================

    #[test]
    fn test_plain_text_is_chat() {
        assert_eq!(p("hello"), Ok(Command::Chat("hello".into())));
        assert_eq!(p("a/b @c"), Ok(Command::Chat("a/b @c".into())));
    }

    // =====================================================================
    // Dice
    // =====================================================================

    #[test]
    fn test_roll_forms() {
        assert_eq!(p("/roll 20"), Ok(Command::Roll { rolls: 1, sides: 20 }));
        assert_eq!(p("/roll 2d6"), Ok(Command::Roll { rolls: 2, sides: 6 }));
        assert_eq!(p("/ROLL 3D8"), Ok(Command::Roll { rolls: 3, sides: 8 }));
    }

    #[test]
    fn test_malformed_rolls() {
        assert!(matches!(p("/roll 0d6"), Err(CommandError::InvalidDice(_))));
        assert!(matches!(p("/roll 2d0"), Err(CommandError::InvalidDice(_))));
        assert!(matches!(p("/roll abc"), Err(CommandError::InvalidDice(_))));
        assert!(matches!(p("/roll"), Err(CommandError::InvalidDice(_))));
        assert!(matches!(p("/roll -1"), Err(CommandError::InvalidDice(_))));
    }

    #[test]
    fn test_roll_respects_limits() {
        let limits = DiceLimits {
            max_rolls: 10,
            max_sides: 100,
        };
        assert!(parse("/roll 10d100", &limits).is_ok());
        assert_eq!(
            parse("/roll 11d6", &limits),
            Err(CommandError::DiceLimit {
                max_rolls: 10,
                max_sides: 100
            })
        );
        assert!(parse("/roll 101", &limits).is_err());
    }

    #[test]
    fn test_check_validates_typed_rolls() {
        let limits = DiceLimits::default();
        assert_eq!(limits.check(2, 6), Ok(()));
        assert_eq!(
            limits.check(0, 6),
            Err(CommandError::InvalidDice("0d6".into()))
        );
        assert!(matches!(
            limits.check(101, 6),
            Err(CommandError::DiceLimit { .. })
        ));
    }

    // =====================================================================
    // Private messages
    // =====================================================================

    #[test]
    fn test_private_message() {
        assert_eq!(
            p("@7 see you  there"),
            Ok(Command::PrivateMessage {
                target: ClientId(7),
                text: "see you  there".into()
            })
        );
    }

    #[test]
    fn test_malformed_private_messages() {
        assert_eq!(p("@x hi"), Err(CommandError::InvalidTarget("x".into())));
        assert_eq!(p("@7"), Err(CommandError::EmptyMessage));
        assert_eq!(p("@ hi"), Err(CommandError::InvalidTarget("".into())));
    }

    // =====================================================================
    // Rooms, mutes, and leaving
    // =====================================================================

    #[test]
    fn test_room_commands() {
        assert_eq!(p("/createroom Games"), Ok(Command::CreateRoom("Games".into())));
        assert_eq!(p("/joinroom  lobby "), Ok(Command::JoinRoom("lobby".into())));
        assert_eq!(p("/listrooms"), Ok(Command::ListRooms(String::new())));
        assert_eq!(p("/listrooms ga"), Ok(Command::ListRooms("ga".into())));
    }

    #[test]
    fn test_mute_commands() {
        assert_eq!(p("/mute Bob"), Ok(Command::Mute("Bob".into())));
        assert_eq!(p("/unmute Bob"), Ok(Command::Unmute("Bob".into())));
        assert_eq!(
            p("/mute"),
            Err(CommandError::MissingArgument("/mute <name>"))
        );
    }

    #[test]
    fn test_disconnect_aliases() {
        for line in ["/disconnect", "/logoff", "/logout"] {
            assert_eq!(p(line), Ok(Command::Disconnect), "line: {line}");
        }
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(p("/dance now"), Err(CommandError::Unknown("dance".into())));
        assert_eq!(p("/"), Err(CommandError::Unknown(String::new())));
    }
}
