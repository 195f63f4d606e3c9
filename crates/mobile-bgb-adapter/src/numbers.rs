use std::fmt;

use crate::{MOBILE_MAX_NUMBER_SIZE, MobileNumber};

/// Phone numbers libmobile reports for the current call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PhoneNumbers {
    user: Option<String>,
    peer: Option<String>,
}

impl PhoneNumbers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a number; `None` or an empty string clears it.
    pub fn update(&mut self, which: MobileNumber, number: Option<&str>) {
        let value = number
            .filter(|n| !n.is_empty())
            .map(|n| n.chars().take(MOBILE_MAX_NUMBER_SIZE).collect());
        match which {
            MobileNumber::User => self.user = value,
            MobileNumber::Peer => self.peer = value,
        }
    }

    /// Window title text, e.g. `Mobile Adapter - Call: 0123 (Your number: 4567)`.
    pub fn title(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PhoneNumbers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Mobile Adapter - ")?;
        match &self.peer {
            Some(peer) => write!(f, "Call: {peer}")?,
            None => f.write_str("Disconnected")?,
        }
        if let Some(user) = &self.user {
            write!(f, " (Your number: {user})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_reflects_call_state() {
        let mut numbers = PhoneNumbers::new();
        assert_eq!(numbers.title(), "Mobile Adapter - Disconnected");

        numbers.update(MobileNumber::User, Some("0901234567"));
        assert_eq!(
            numbers.title(),
            "Mobile Adapter - Disconnected (Your number: 0901234567)"
        );

        numbers.update(MobileNumber::Peer, Some("0755551234"));
        assert_eq!(
            numbers.title(),
            "Mobile Adapter - Call: 0755551234 (Your number: 0901234567)"
        );

        numbers.update(MobileNumber::Peer, None);
        numbers.update(MobileNumber::User, Some(""));
        assert_eq!(numbers.title(), "Mobile Adapter - Disconnected");
    }

    #[test]
    fn long_numbers_are_truncated() {
        let mut numbers = PhoneNumbers::new();
        let long = "9".repeat(MOBILE_MAX_NUMBER_SIZE + 8);
        numbers.update(MobileNumber::Peer, Some(&long));
        let expected = format!("Mobile Adapter - Call: {}", "9".repeat(MOBILE_MAX_NUMBER_SIZE));
        assert_eq!(numbers.title(), expected);
    }
}
