//! App-level signature: the configuration surface whose changes cannot be
//! absorbed by an in-process re-render.

use serde::{Deserialize, Serialize};

/// A snapshot of everything about the app that the client or the process
/// bootstrap depends on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppSignature {
    pub mode: String,
    pub api_prefix: String,
    pub not_found: Option<String>,
    pub codegen_paths: Vec<String>,
    /// Fingerprint of the route tree structure.
    pub routes: u64,
    pub middleware: Vec<String>,
    pub plugins: Vec<String>,
    pub cookie: String,
    pub session_store: String,
}

/// What a signature change forces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureImpact {
    /// Nothing structural changed.
    None,
    /// Route-only change: the client must re-resolve its location.
    ClientReload,
    /// Bootstrap-level change: only a process restart is safe.
    Restart(String),
}

/// Classify the difference between two app signatures. Route-only changes
/// need a client reload; anything deeper needs a fresh process.
pub fn compare_signatures(old: &AppSignature, new: &AppSignature) -> SignatureImpact {
    if old.mode != new.mode {
        return SignatureImpact::Restart("app mode changed".into());
    }
    if old.api_prefix != new.api_prefix {
        return SignatureImpact::Restart("api prefix changed".into());
    }
    if old.codegen_paths != new.codegen_paths {
        return SignatureImpact::Restart("codegen paths changed".into());
    }
    if old.middleware != new.middleware {
        return SignatureImpact::Restart("middleware stack changed".into());
    }
    if old.plugins != new.plugins {
        return SignatureImpact::Restart("plugin list changed".into());
    }
    if old.cookie != new.cookie {
        return SignatureImpact::Restart("cookie config changed".into());
    }
    if old.session_store != new.session_store {
        return SignatureImpact::Restart("session store config changed".into());
    }
    if old.routes != new.routes || old.not_found != new.not_found {
        return SignatureImpact::ClientReload;
    }
    SignatureImpact::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_changes_need_a_client_reload() {
        let old = AppSignature::default();
        let new = AppSignature {
            routes: 1,
            ..AppSignature::default()
        };
        assert_eq!(compare_signatures(&old, &new), SignatureImpact::ClientReload);
    }

    #[test]
    fn middleware_changes_need_a_restart() {
        let old = AppSignature::default();
        let new = AppSignature {
            middleware: vec!["auth".into()],
            ..AppSignature::default()
        };
        assert!(matches!(
            compare_signatures(&old, &new),
            SignatureImpact::Restart(_)
        ));
    }

    #[test]
    fn identical_signatures_are_quiet() {
        let sig = AppSignature::default();
        assert_eq!(compare_signatures(&sig, &sig.clone()), SignatureImpact::None);
    }
}
