use serde::Deserialize;
use utoipa::OpenApi;

pub mod api;

/// Standard `?limit&offset` pagination.
#[derive(Debug, Clone, Copy, Deserialize, utoipa::IntoParams)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 500)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::search,
        api::grab,
        api::all_downloads,
        api::get_download,
        api::retry_download,
        api::cancel_download,
        api::all_content,
        api::add_content,
        api::get_content,
        api::delete_content,
        api::all_files,
        api::import_path,
        api::all_history,
        api::verify,
        api::plex_status,
        api::plex_refresh,
        api::all_profiles,
    ),
    tags(
        (name = "Search", description = "Indexer search and release ranking"),
        (name = "Downloads", description = "Download lifecycle management"),
        (name = "Content", description = "Tracked movies and series"),
        (name = "System", description = "Verification, events and health"),
    )
)]
pub struct OpenApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_bounds() {
        let p = Pagination {
            limit: None,
            offset: None,
        };
        assert_eq!(50, p.limit());
        assert_eq!(0, p.offset());
        let p = Pagination {
            limit: Some(100_000),
            offset: Some(-4),
        };
        assert_eq!(500, p.limit());
        assert_eq!(0, p.offset());
    }
}
