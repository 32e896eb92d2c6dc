use crate::identity::SessionIdentity;

/// UI affordances derived from the session. Not a security boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Capabilities {
    /// Any resolved identity counts, anonymous ones included.
    pub elevated_view: bool,
}

impl Capabilities {
    pub fn for_session(identity: Option<&SessionIdentity>) -> Self {
        Self {
            elevated_view: identity.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_identity_is_elevated() {
        let anonymous = SessionIdentity::new("anon-1", true);
        let named = SessionIdentity::new("user-1", false);

        assert!(Capabilities::for_session(Some(&anonymous)).elevated_view);
        assert!(Capabilities::for_session(Some(&named)).elevated_view);
        assert!(!Capabilities::for_session(None).elevated_view);
    }
}
