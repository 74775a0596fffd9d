use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Courier API",
        version = "0.1.0",
        description = "Batch content resolution with per-backend fallback and circuit breaking."
    ),
    paths(
        crate::routes::resolve,
        crate::routes::list_backends,
        crate::routes::reset_backend,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::ResolveRequest,
        crate::dto::ResolveResponse,
        crate::dto::ResolvedContent,
        crate::dto::BackendResponse,
        crate::dto::BackendListResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "resolve", description = "Batch URL resolution"),
        (name = "backends", description = "Backend health and circuit-breaker control"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI spec.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some("Set via COURIER_SERVER_API_KEY."))
                        .build(),
                ),
            );
        }
    }
}
