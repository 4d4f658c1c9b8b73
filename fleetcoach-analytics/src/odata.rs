//! Data connector OData feed.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::{AnalyticsError, AnalyticsSource, Table};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const SEARCH: &str = "last_14_day";
const PAGE_SIZE: usize = 2000;
/// Stop following `@odata.nextLink` once this many rows are held.
pub const MAX_ROWS: usize = 5000;

#[derive(Clone, Debug)]
pub struct ODataCredentials {
    /// Connector host prefix (`odata-connector-2`) or a full service root URL.
    pub server: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

pub struct ODataClient {
    http: reqwest::Client,
    root: String,
    user: String,
    password: String,
}

fn service_root(server: &str) -> String {
    if server.starts_with("http://") || server.starts_with("https://") {
        server.trim_end_matches('/').to_string()
    } else {
        format!("https://{server}.geotab.com/odata/v4/svc")
    }
}

impl ODataClient {
    pub fn new(credentials: ODataCredentials) -> Result<Self, AnalyticsError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AnalyticsError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            root: service_root(&credentials.server),
            user: format!("{}/{}", credentials.database, credentials.username),
            password: credentials.password,
        })
    }

    async fn page(
        &self,
        table: Table,
        req: reqwest::RequestBuilder,
    ) -> Result<Page, AnalyticsError> {
        let resp = req
            .basic_auth(&self.user, Some(&self.password))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AnalyticsError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AnalyticsError::Status {
                table: table.name(),
                status: status.as_u16(),
                body,
            });
        }
        resp.json()
            .await
            .map_err(|e| AnalyticsError::Decode(e.to_string()))
    }
}

#[async_trait]
impl AnalyticsSource for ODataClient {
    async fn rows(&self, table: Table) -> Result<Vec<Value>, AnalyticsError> {
        let url = format!("{}/{}", self.root, table.name());
        let top = PAGE_SIZE.to_string();
        let first = self.http.get(&url).query(&[
            ("$select", table.select()),
            ("$search", SEARCH),
            ("$top", top.as_str()),
        ]);
        let Page {
            value: mut rows,
            mut next_link,
        } = self.page(table, first).await?;

        while let Some(link) = next_link.take() {
            if rows.len() >= MAX_ROWS {
                tracing::debug!(table = table.name(), rows = rows.len(), "row cap reached");
                break;
            }
            let page = self.page(table, self.http.get(&link)).await?;
            rows.extend(page.value);
            next_link = page.next_link;
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Query, State},
        http::{HeaderMap, StatusCode},
        routing::get,
        Json, Router,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/svc")
    }

    fn client(root: String) -> ODataClient {
        ODataClient::new(ODataCredentials {
            server: root,
            database: "acme".into(),
            username: "ops@acme.test".into(),
            password: "hunter2".into(),
        })
        .unwrap()
    }

    #[test]
    fn service_root_from_connector_prefix() {
        assert_eq!(
            service_root("odata-connector-2"),
            "https://odata-connector-2.geotab.com/odata/v4/svc"
        );
        assert_eq!(service_root("http://127.0.0.1:9/svc/"), "http://127.0.0.1:9/svc");
    }

    #[derive(Clone)]
    struct Pages {
        base: Arc<std::sync::Mutex<String>>,
        hits: Arc<AtomicUsize>,
        rows_per_page: usize,
        last_page: Option<usize>,
    }

    async fn kpis(
        State(pages): State<Pages>,
        Query(q): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> Json<Value> {
        pages.hits.fetch_add(1, Ordering::SeqCst);
        let auth = headers["authorization"].to_str().unwrap().to_string();
        // "acme/ops@acme.test:hunter2"
        assert_eq!(auth, "Basic YWNtZS9vcHNAYWNtZS50ZXN0Omh1bnRlcjI=");
        let page: usize = q.get("page").map(|p| p.parse().unwrap()).unwrap_or(0);
        if page == 0 {
            assert_eq!(q["$search"], "last_14_day");
            assert_eq!(q["$top"], "2000");
            assert!(q["$select"].starts_with("Device_Name,"));
        }
        let rows: Vec<Value> = (0..pages.rows_per_page).map(|i| json!({ "Trip_Count": i })).collect();
        let mut body = json!({ "value": rows });
        if pages.last_page != Some(page) {
            let base = pages.base.lock().unwrap().clone();
            body["@odata.nextLink"] = json!(format!("{base}/VehicleKpi_Daily?page={}", page + 1));
        }
        Json(body)
    }

    async fn paged(rows_per_page: usize, last_page: Option<usize>) -> (ODataClient, Pages) {
        let pages = Pages {
            base: Arc::new(std::sync::Mutex::new(String::new())),
            hits: Arc::new(AtomicUsize::new(0)),
            rows_per_page,
            last_page,
        };
        let app = Router::new()
            .route("/svc/VehicleKpi_Daily", get(kpis))
            .with_state(pages.clone());
        let root = serve(app).await;
        *pages.base.lock().unwrap() = root.clone();
        (client(root), pages)
    }

    #[tokio::test]
    async fn follows_next_links_to_the_end() {
        let (client, pages) = paged(3, Some(2)).await;
        let rows = client.rows(Table::VehicleKpi).await.unwrap();
        assert_eq!(rows.len(), 9);
        assert_eq!(pages.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_paging_at_the_row_cap() {
        let (client, pages) = paged(PAGE_SIZE, None).await;
        let rows = client.rows(Table::VehicleKpi).await.unwrap();
        assert_eq!(rows.len(), 3 * PAGE_SIZE);
        assert_eq!(pages.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn error_status_carries_table_and_body() {
        let app = Router::new().route(
            "/svc/DriverSafety_Daily",
            get(|| async { (StatusCode::FORBIDDEN, "no connector access") }),
        );
        let err = client(serve(app).await)
            .rows(Table::DriverSafety)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "OData DriverSafety_Daily error 403: no connector access"
        );
    }
}
