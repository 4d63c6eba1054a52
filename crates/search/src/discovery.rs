use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shopper_core::collaborators::{SearchBackend, SearchHits};
use shopper_core::config::SearchConfig;
use shopper_core::domain::filter::{Collection, FilterSet};
use shopper_core::errors::CollaboratorError;
use tracing::debug;

use crate::expression::FilterExpression;
use crate::records::{item_from_document, review_from_document};

const DEFAULT_ENDPOINT: &str = "https://discoveryengine.googleapis.com";

/// Discovery Engine search over one datastore per collection.
#[derive(Clone, Debug)]
pub struct DiscoveryEngineClient {
    http: reqwest::Client,
    endpoint: String,
    project_id: String,
    location: String,
    items_datastore: String,
    reviews_datastore: String,
    access_token: SecretString,
}

impl DiscoveryEngineClient {
    pub fn from_config(config: &SearchConfig) -> Result<Self, CollaboratorError> {
        let required = |value: &Option<String>, name: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .ok_or_else(|| CollaboratorError::Rejected(format!("search.{name} is not set")))
        };
        let access_token = config
            .access_token
            .clone()
            .ok_or_else(|| CollaboratorError::Rejected("search.access_token is not set".into()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| CollaboratorError::Unavailable(error.to_string()))?;

        Ok(Self {
            http,
            endpoint: regional_endpoint(&config.endpoint, &config.location),
            project_id: required(&config.project_id, "project_id")?,
            location: config.location.trim().to_string(),
            items_datastore: required(&config.items_datastore, "items_datastore")?,
            reviews_datastore: required(&config.reviews_datastore, "reviews_datastore")?,
            access_token,
        })
    }

    pub fn search_url(&self, collection: Collection) -> String {
        let datastore = match collection {
            Collection::Items => &self.items_datastore,
            Collection::Reviews => &self.reviews_datastore,
        };
        format!(
            "{}/v1/projects/{}/locations/{}/collections/default_collection/dataStores/{}/servingConfigs/default_serving_config:search",
            self.endpoint.trim_end_matches('/'),
            self.project_id,
            self.location,
            datastore
        )
    }
}

/// Non-global locations use the regional host, as the public API requires.
fn regional_endpoint(configured: &str, location: &str) -> String {
    let location = location.trim();
    if configured.trim_end_matches('/') == DEFAULT_ENDPOINT && location != "global" {
        format!("https://{location}-discoveryengine.googleapis.com")
    } else {
        configured.trim_end_matches('/').to_string()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    query: &'a str,
    page_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    document: Option<Document>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(default)]
    struct_data: Map<String, Value>,
}

fn documents(response: SearchResponse) -> impl Iterator<Item = Map<String, Value>> {
    response.results.into_iter().filter_map(|result| result.document).map(|doc| doc.struct_data)
}

fn to_hits(collection: Collection, body: &str) -> Result<SearchHits, CollaboratorError> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|error| CollaboratorError::Malformed(format!("search response: {error}")))?;
    Ok(match collection {
        Collection::Items => {
            SearchHits::Items(documents(response).filter_map(|doc| item_from_document(&doc)).collect())
        }
        Collection::Reviews => SearchHits::Reviews(
            documents(response).filter_map(|doc| review_from_document(&doc)).collect(),
        ),
    })
}

#[async_trait]
impl SearchBackend for DiscoveryEngineClient {
    async fn search(
        &self,
        collection: Collection,
        filters: &FilterSet,
        query: &str,
        max_results: usize,
    ) -> Result<SearchHits, CollaboratorError> {
        if query.trim().is_empty() {
            return Err(CollaboratorError::Rejected("query must be a non-empty string".into()));
        }
        let filter = FilterExpression::for_collection(collection, filters)?
            .map(|expression| expression.to_string());
        debug!(
            event_name = "search.request",
            collection = collection.as_str(),
            filter = filter.as_deref().unwrap_or(""),
            "querying discovery engine"
        );

        let response = self
            .http
            .post(self.search_url(collection))
            .bearer_auth(self.access_token.expose_secret())
            .json(&SearchRequest { query: query.trim(), page_size: max_results, filter })
            .send()
            .await
            .map_err(|error| CollaboratorError::Unavailable(error.to_string()))?;

        let status = response.status();
        let body =
            response.text().await.map_err(|error| CollaboratorError::Unavailable(error.to_string()))?;
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(CollaboratorError::Unavailable(format!("search returned {status}")));
        }
        if !status.is_success() {
            return Err(CollaboratorError::Rejected(format!("search returned {status}: {body}")));
        }

        to_hits(collection, &body)
    }
}

#[cfg(test)]
mod tests {
    use shopper_core::collaborators::SearchHits;
    use shopper_core::config::{AppConfig, SearchProvider};
    use shopper_core::domain::filter::Collection;
    use shopper_core::errors::CollaboratorError;

    use super::{regional_endpoint, to_hits, DiscoveryEngineClient};

    fn config(location: &str) -> shopper_core::config::SearchConfig {
        let mut search = AppConfig::default().search;
        search.provider = SearchProvider::DiscoveryEngine;
        search.project_id = Some("shop-demo".to_string());
        search.location = location.to_string();
        search.items_datastore = Some("items-ds".to_string());
        search.reviews_datastore = Some("reviews-ds".to_string());
        search.access_token = Some("ya29.token".to_string().into());
        search
    }

    #[test]
    fn serving_config_path_is_datastore_scoped() {
        let client = DiscoveryEngineClient::from_config(&config("global")).expect("client");
        assert_eq!(
            client.search_url(Collection::Reviews),
            "https://discoveryengine.googleapis.com/v1/projects/shop-demo/locations/global/collections/default_collection/dataStores/reviews-ds/servingConfigs/default_serving_config:search"
        );
    }

    #[test]
    fn regional_locations_use_regional_host() {
        assert_eq!(
            regional_endpoint("https://discoveryengine.googleapis.com", "eu"),
            "https://eu-discoveryengine.googleapis.com"
        );
        assert_eq!(
            regional_endpoint("http://localhost:9000/", "eu"),
            "http://localhost:9000"
        );
    }

    #[test]
    fn missing_datastore_is_rejected() {
        let mut search = config("us");
        search.items_datastore = None;
        let error = DiscoveryEngineClient::from_config(&search).expect_err("incomplete config");
        assert!(matches!(error, CollaboratorError::Rejected(message) if message.contains("items_datastore")));
    }

    #[test]
    fn struct_data_maps_to_items() {
        let body = r#"{"results":[
            {"document":{"structData":{"parent_asin":"B1","title":"Sandal","price":25}}},
            {"document":{"structData":{"title":"no id"}}},
            {"document":null}
        ]}"#;
        let SearchHits::Items(items) = to_hits(Collection::Items, body).expect("parses") else {
            panic!("expected items");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].price, Some(25.0));
    }

    #[test]
    fn empty_response_has_no_hits() {
        let hits = to_hits(Collection::Reviews, "{}").expect("parses");
        assert!(hits.is_empty());
        assert!(matches!(
            to_hits(Collection::Items, "not json"),
            Err(CollaboratorError::Malformed(_))
        ));
    }
}
