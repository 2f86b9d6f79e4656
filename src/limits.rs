pub const MAX_COUNSELORS: usize = 10_000;
pub const MAX_PROFILES: usize = 1_000_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_REASON_LEN: usize = 512;
pub const MAX_WEEKLY_RULES_PER_COUNSELOR: usize = 7 * 24;
pub const MAX_ENTITIES_PER_COUNSELOR: usize = 100_000;
/// How far ahead a booking or an override may be placed.
pub const MAX_DAYS_AHEAD: i64 = 366;
