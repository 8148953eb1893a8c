use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Spyglass Preview API",
        version = "0.1.0",
        description = "API REST du démon d'aperçu de fichiers",
        contact(
            name = "Spyglass",
        )
    ),
    paths(
        crate::api::display,
        crate::api::close,
        crate::api::stop,
    ),
    components(
        schemas(
            crate::api::DisplayRequest,
            crate::api::CloseRequest,
            crate::api::StatusResponse,
        )
    ),
    tags(
        (name = "preview", description = "Sélection et cycle de vie des aperçus")
    )
)]
pub struct ApiDoc;
