/// Canonical comparison key for a restaurant name.
///
/// Every whitespace character is removed (not collapsed), the rest is
/// lowercased, and only ASCII letters and digits survive. Two names refer to
/// the same restaurant iff their keys are equal.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|character| !character.is_whitespace())
        .flat_map(char::to_lowercase)
        .filter(|character| character.is_ascii_lowercase() || character.is_ascii_digit())
        .collect()
}
