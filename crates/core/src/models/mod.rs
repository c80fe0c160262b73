pub mod ags;
pub mod deeplink;
pub mod oidc;
pub mod roster;
pub mod tool;
