//! Emoji used by the admin CLI, with plain-text fallbacks for dumb terminals.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");

// Repository indicators
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
pub static BRANCH: Emoji<'_, '_> = Emoji("🌿 ", "");
pub static STAR: Emoji<'_, '_> = Emoji("⭐ ", "*");
