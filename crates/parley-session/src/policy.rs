use serde::Deserialize;

use crate::Session;

/// Decides whether a message from one client is withheld from another.
///
/// ```text
///                    recipient mutes sender   sender mutes recipient
///   Bidirectional          withheld                 withheld
///   RecipientOnly          withheld                 delivered
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutePolicy {
    /// Muting cuts the line both ways.
    #[default]
    Bidirectional,

    /// Only the muting side stops hearing the other.
    RecipientOnly,
}

impl MutePolicy {
    /// Returns `true` if `recipient` must not receive what `sender` says.
    pub fn suppresses(self, sender: &Session, recipient: &Session) -> bool {
        if recipient.is_muted(sender.name()) {
            return true;
        }
        match self {
            Self::Bidirectional => sender.is_muted(recipient.name()),
            Self::RecipientOnly => false,
        }
    }
}
