use rand::Rng;

/// Inclusive range of session codes. Six decimal digits, first digit
/// non-zero, so every code round-trips through clients as a plain string.
const CODE_MIN: u32 = 100_000;
const CODE_MAX: u32 = 999_999;

/// Draw a random candidate session code (not yet checked for uniqueness).
///
/// Uniqueness among live sessions is enforced by the allocator's
/// conditional put against the store, not here.
pub fn draw_session_code() -> String {
    let mut rng = rand::thread_rng();
    rng.gen_range(CODE_MIN..=CODE_MAX).to_string()
}
