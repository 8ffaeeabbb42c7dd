//! Query kind to upstream endpoint mapping

use rail_query::{Query, QueryError, QueryKind};

/// Provider path for a query kind
pub fn endpoint_path(kind: QueryKind) -> &'static str {
    match kind {
        QueryKind::RouteSearch => "/liveStation",
        QueryKind::LiveStatus => "/liveTrain",
        QueryKind::BookingStatus => "/pnrStatus",
        QueryKind::Schedule => "/trainSchedule",
    }
}

/// A validated, owned upstream call description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub kind: QueryKind,
    /// Query-string parameters, in the kind's declared order
    pub params: Vec<(&'static str, String)>,
}

impl UpstreamRequest {
    /// Build the request for a query, failing if parameters are missing
    pub fn from_query(query: &Query) -> Result<Self, QueryError> {
        let params = query
            .required_pairs()?
            .into_iter()
            .map(|(name, value)| (name, value.to_string()))
            .collect();
        Ok(Self {
            kind: query.kind(),
            params,
        })
    }

    pub fn path(&self) -> &'static str {
        endpoint_path(self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(endpoint_path(QueryKind::RouteSearch), "/liveStation");
        assert_eq!(endpoint_path(QueryKind::LiveStatus), "/liveTrain");
        assert_eq!(endpoint_path(QueryKind::BookingStatus), "/pnrStatus");
        assert_eq!(endpoint_path(QueryKind::Schedule), "/trainSchedule");
    }

    #[test]
    fn test_from_query_forwards_required_params_only() {
        let query = Query::search("NDLS", "GKP", "8").with_param("debug", "1");
        let request = UpstreamRequest::from_query(&query).unwrap();
        assert_eq!(request.path(), "/liveStation");
        assert_eq!(
            request.params,
            vec![
                ("source", "NDLS".to_string()),
                ("destination", "GKP".to_string()),
                ("hours", "8".to_string()),
            ]
        );
    }

    #[test]
    fn test_from_query_rejects_missing() {
        let query = Query::new(QueryKind::BookingStatus);
        assert!(UpstreamRequest::from_query(&query).is_err());
    }
}
