//! `OpenAPI` specification generation for `carta-api`.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// `OpenAPI` documentation for the Carta REST API (`/api/*`).
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Carta API",
        description = "Carta file-metadata catalog REST API"
    ),
    paths(
        crate::routes::files::create_file,
        crate::routes::files::list_files,
        crate::routes::files::get_file,
        crate::routes::files::replace_file,
        crate::routes::files::patch_file,
        crate::routes::files::delete_file,
        crate::routes::collections::create_collection,
        crate::routes::collections::list_collections,
        crate::routes::collections::get_collection,
        crate::routes::collections::collection_files,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ConflictRef,
            crate::error::ConflictLocation,
            crate::routes::LinkObject,
            crate::routes::ResourceLinks,
            crate::routes::files::FileRefResponse,
            crate::routes::collections::CreateCollectionRequest,
            crate::routes::collections::CollectionRefResponse,
        )
    ),
    tags(
        (name = "files", description = "File record operations"),
        (name = "collections", description = "Collection operations"),
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Returns the generated `OpenAPI` spec.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
