use std::fmt::Write;

/// Postings are keyed by `name=value`. Label names never contain `=`, so the first `=` splits
/// a key unambiguously and all values of one label share the `name=` prefix.
pub fn format_key_for_label_prefix(dest: &mut String, label_name: &str) {
    dest.clear();
    // writing to a String does not fail
    let _ = write!(dest, "{label_name}=");
}

pub fn format_key_for_label_value(dest: &mut String, label_name: &str, value: &str) {
    dest.clear();
    let _ = write!(dest, "{label_name}={value}");
}

pub fn get_key_for_label_value(label_name: &str, value: &str) -> String {
    let mut res = String::with_capacity(label_name.len() + value.len() + 1);
    format_key_for_label_value(&mut res, label_name, value);
    res
}

/// Splits a postings key into label name and value.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('=')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        let mut prefix = String::from("stale");
        format_key_for_label_prefix(&mut prefix, "job");
        assert_eq!(prefix, "job=");
        assert_eq!(get_key_for_label_value("job", "a=b"), "job=a=b");
        assert_eq!(split_key("job=a=b"), Some(("job", "a=b")));
    }
}
