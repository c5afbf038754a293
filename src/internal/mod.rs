pub(crate) mod oauth_flow_controller;
pub(crate) mod role_cache;
pub(crate) mod role_change_watcher;
pub(crate) mod session_synchronizer;
pub(crate) mod token_expiry_monitor;
