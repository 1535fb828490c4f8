use crate::domain_model::RoleName;

pub struct RouteAccess {
    pub path: &'static str,
    pub required: &'static [RoleName],
}

/// Protected-path table. Plain configuration data: a route is protected iff
/// it is listed here, and a caller passes with any one of the listed roles.
/// Routes not listed only need a valid token wherever the router asks for one.
pub const PROTECTED_ROUTES: &[RouteAccess] = &[
    RouteAccess {
        path: "/api/v1/logout",
        required: &[RoleName::Admin, RoleName::User],
    },
    RouteAccess {
        path: "/api/v1/me",
        required: &[RoleName::Admin, RoleName::User],
    },
];

pub fn required_roles(path: &str) -> Option<&'static [RoleName]> {
    PROTECTED_ROUTES
        .iter()
        .find(|route| route.path == path)
        .map(|route| route.required)
}

/// The single authorization check: does the granted role set open this path?
pub fn authorize(path: &str, granted: &[RoleName]) -> bool {
    match required_roles(path) {
        None => true,
        Some(required) => granted.iter().any(|role| required.contains(role)),
    }
}
