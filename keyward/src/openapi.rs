//! OpenAPI documentation for the management API.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

/// Security scheme for routes that require a signed access token.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Access token authentication. Obtain a token pair from `POST /auth/login` \
                            and send the access token in the `Authorization` header:\n\n\
                            ```\nAuthorization: Bearer YOUR_ACCESS_TOKEN\n```\n\n\
                            Access tokens are short-lived; exchange the refresh token at \
                            `POST /auth/refresh` for a new pair.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::auth::refresh,
        api::handlers::auth::logout,
        api::handlers::auth::change_password,
        api::handlers::users::me,
        api::handlers::users::update_me,
        api::handlers::users::list_users,
        api::handlers::users::get_user,
        api::handlers::users::deactivate_user,
        api::handlers::permissions::get_user_permissions,
        api::handlers::permissions::set_user_permission,
    ),
    components(schemas(
        api::models::auth::RegisterRequest,
        api::models::auth::LoginRequest,
        api::models::auth::RefreshRequest,
        api::models::auth::ChangePasswordRequest,
        api::models::auth::TokenPairResponse,
        api::models::auth::LogoutResponse,
        api::models::users::UserResponse,
        api::models::users::UserUpdateRequest,
        api::models::permissions::OverrideResponse,
        api::models::permissions::UserPermissionsResponse,
        api::models::permissions::SetPermissionRequest,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "authentication", description = "Login, token rotation and session management"),
        (name = "users", description = "User profiles and account administration"),
        (name = "permissions", description = "Per-user permission overrides"),
    ),
    info(
        title = "Keyward API",
        description = "Session-based authentication with rotating refresh tokens and \
            role-plus-override permission resolution."
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_includes_bearer_scheme() {
        let spec = ApiDoc::openapi();
        let components = spec.components.expect("components should be present");
        assert!(components.security_schemes.contains_key("BearerAuth"));
    }

    #[test]
    fn test_spec_covers_auth_routes() {
        let spec = ApiDoc::openapi();
        for path in ["/auth/login", "/auth/refresh", "/auth/logout", "/users/me"] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
