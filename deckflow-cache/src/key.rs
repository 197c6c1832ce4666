//! Cache key construction.

use sha2::{Digest, Sha256};

/// Separates the model, system and user sections of a [`prompt_key`].
pub const SECTION: char = '\u{1f}';

/// Canonical key text for a completion of `system` + `user` on `model`.
pub fn prompt_key(model: &str, system: &str, user: &str) -> String {
    format!("{}{s}{}{s}{}", model.trim(), system.trim(), user.trim(), s = SECTION)
}

/// The part of a key that tells near-duplicates apart: model and user
/// prompt for keys built by [`prompt_key`], the whole text otherwise.
/// System prompts are shared boilerplate across jobs and are left out.
pub(crate) fn distinguishing_text(key: &str) -> String {
    let mut sections = key.splitn(3, SECTION);
    match (sections.next(), sections.next(), sections.next()) {
        (Some(model), Some(_system), Some(user)) => format!("{} {}", model, user),
        _ => key.to_string(),
    }
}

/// Key under which `key` is stored in the remote tier.
pub fn remote_key(namespace: &str, key: &str) -> String {
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}:{}", namespace, &digest[..32])
}
