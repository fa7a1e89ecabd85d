//! Resource identifiers.
//!
//! An RI is `name[/sub...]`. The leading segment selects a registered actor;
//! the remainder ("whom") is handed to that actor untouched so it can address
//! something inside itself (a chat channel, a nested container member, ...).

/// Split an RI into its leading actor name and the remainder.
///
/// The remainder is empty when the RI has no `/`.
pub fn split(ri: &str) -> (&str, &str) {
    match ri.split_once('/') {
        Some((name, whom)) => (name, whom),
        None => (ri, ""),
    }
}

/// Leading actor name of an RI.
pub fn name(ri: &str) -> &str {
    split(ri).0
}

/// Append a sub-address to an RI, skipping the separator for an empty suffix.
pub fn join(base: &str, whom: &str) -> String {
    if whom.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{whom}")
    }
}

/// Prefix an RI with a list of hops, producing `hop1/hop2/.../ri`.
pub fn prefixed<S: AsRef<str>>(hops: &[S], ri: &str) -> String {
    let mut path = String::new();
    for hop in hops {
        path.push_str(hop.as_ref());
        path.push('/');
    }
    path.push_str(ri);
    path
}
