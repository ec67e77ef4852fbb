use crate::config::Config;
use crate::policy::CountryPolicyTable;

/// Read-only after startup; each request builds its own resolver.
pub struct AppState {
    pub config: Config,
    pub policies: CountryPolicyTable,
}
