use utoipa::OpenApi;

use crate::modules::clips::dto::{ClipListEntry, JobAccepted, ProcessRequest};
use crate::modules::clips::model::ClipRecord;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::clips::handler::submit_request,
        crate::modules::clips::handler::latest_clip,
        crate::modules::clips::handler::list_clips,
    ),
    components(
        schemas(ProcessRequest, JobAccepted, ClipListEntry, ClipRecord)
    ),
    tags(
        (name = "Clips", description = "Clip requests and delivery lookup")
    )
)]
pub struct ApiDoc;
