/// Suffix the network uses for individual user addresses.
pub const USER_SUFFIX: &str = "@c.us";

/// Turn a phone number as typed by a caller into a user address.
///
/// Non-digits are dropped, a leading trunk `0` becomes `country_code`, and the
/// user suffix is appended. Already-formatted addresses pass through.
pub fn format_phone_number(number: &str, country_code: &str) -> String {
    let number = number.trim();
    if number.ends_with(USER_SUFFIX) {
        return number.to_string();
    }

    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    let digits = match digits.strip_prefix('0') {
        Some(rest) => format!("{country_code}{rest}"),
        None => digits,
    };
    format!("{digits}{USER_SUFFIX}")
}
