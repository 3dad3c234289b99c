mod id;

pub use id::*;

use rand::{distributions::Alphanumeric, thread_rng, Rng};

/// Returns a random alphanumeric string of the given length.
pub fn random_string(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect()
}

/// Percent-encodes a value for use in a query string.
pub fn encode_query_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod test {
    use super::{encode_query_value, random_string};

    #[test]
    fn random_string_has_requested_length() {
        let value = random_string(10);

        assert_eq!(value.len(), 10);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn query_values_are_encoded() {
        assert_eq!(encode_query_value("ABCD"), "ABCD");
        assert_eq!(encode_query_value("a b&c"), "a+b%26c");
    }
}
