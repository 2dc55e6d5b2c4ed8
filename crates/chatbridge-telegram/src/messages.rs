//! Canned reply strings for the pairing handshake and unbridge notices.

pub const QUEUEING_MESSAGE: &str = "\
Specified room has been successfully placed on the queue.\n\
Please invite this bridge's XMPP account to your XMPP room, and as the \
reason for the invitation specify the secret key from the bridge's \
configuration, or ask the operator for it.\n\n\
If you specified an incorrect room address, simply repeat the pair \
command with the corrected address.";

pub const INVALID_JID_MESSAGE: &str =
    "You have specified an incorrect room JID. Please try again.";

pub const MISSING_MUC_JID_MESSAGE: &str =
    "Please specify the MUC address of the room you want to pair with this chat.";

pub const UNBRIDGE_TELEGRAM_MESSAGE: &str =
    "This chat was automatically unbridged due to a bot kick in XMPP. \
If you want to bridge it again, invite this bot to the chat again and \
reissue the pairing command.";

pub fn transfer_failure(filename: &str, sender: &str) -> String {
    format!("Couldn't transfer file {filename} from {sender}")
}
