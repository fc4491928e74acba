//! Backend collections, as untyped JSON.
//!
//! Entity shapes vary between backend versions (eg, `category` vs `categoria`), so payloads are
//! passed through as `serde_json::Value`. Everything here goes through [`ApiClient::send`] and so
//! carries the bearer token and may trigger a refresh.

use crate::client::ApiClient;
use crate::error::{ApiError, Result};
use crate::transport::{ApiRequest, HttpMethod};
use anyhow::anyhow;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Resource {
    Products,
    Sales,
    Customers,
    Suppliers,
    Categories,
    StockMovements,
    Users,
}

impl Resource {
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Products => "/products",
            Resource::Sales => "/sales",
            Resource::Customers => "/customers",
            Resource::Suppliers => "/suppliers",
            Resource::Categories => "/categories",
            Resource::StockMovements => "/stock-movements",
            Resource::Users => "/users",
        }
    }

    pub fn item_path(&self, id: &str) -> String {
        format!("{}/{}", self.path(), id)
    }
}

impl FromStr for Resource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('/') {
            "products" | "produtos" => Ok(Resource::Products),
            "sales" | "vendas" => Ok(Resource::Sales),
            "customers" | "clientes" => Ok(Resource::Customers),
            "suppliers" | "fornecedores" => Ok(Resource::Suppliers),
            "categories" | "categorias" => Ok(Resource::Categories),
            "stock-movements" | "movements" => Ok(Resource::StockMovements),
            "users" => Ok(Resource::Users),
            _ => Err(anyhow!("unknown resource: {}", s)),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().trim_start_matches('/'))
    }
}

/// Reports the backend can render as a downloadable spreadsheet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ReportKind {
    Sales,
    Products,
    Customers,
    Stock,
}

impl ReportKind {
    /// Name used by the backend in `/reports/{name}/download`.
    pub fn name(&self) -> &'static str {
        match self {
            ReportKind::Sales => "vendas",
            ReportKind::Products => "produtos",
            ReportKind::Customers => "clientes",
            ReportKind::Stock => "estoque",
        }
    }

    pub fn download_path(&self) -> String {
        format!("/reports/{}/download", self.name())
    }

    /// eg, `relatorio-vendas-2024-03-16.xlsx`
    pub fn default_filename(&self, date: time::Date) -> String {
        format!(
            "relatorio-{}-{:04}-{:02}-{:02}.xlsx",
            self.name(),
            date.year(),
            u8::from(date.month()),
            date.day()
        )
    }
}

impl FromStr for ReportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sales" | "vendas" => Ok(ReportKind::Sales),
            "products" | "produtos" => Ok(ReportKind::Products),
            "customers" | "clientes" => Ok(ReportKind::Customers),
            "stock" | "estoque" => Ok(ReportKind::Stock),
            _ => Err(anyhow!("unknown report: {}", s)),
        }
    }
}

/// CRUD handle on one collection; see [`ApiClient::resource`].
pub struct Resources<'a> {
    client: &'a ApiClient,
    resource: Resource,
}

impl<'a> Resources<'a> {
    /// All records. A body that is not a JSON array is reported as an error rather than being
    /// silently treated as empty.
    pub async fn list(&self) -> Result<Vec<Value>> {
        let val: Value = self.client.get_json(self.resource.path()).await?;
        // some endpoints wrap collections as {"data": [...]}
        if let Some(Value::Array(items)) = val.get("data") {
            return Ok(items.clone());
        }
        match val {
            Value::Array(items) => Ok(items),
            other => Err(ApiError::Backend {
                status: 200,
                message: format!("expected a list of {}", self.resource),
                body: Some(other),
            }),
        }
    }

    pub async fn fetch(&self, id: &str) -> Result<Value> {
        self.client.get_json(&self.resource.item_path(id)).await
    }

    pub async fn create(&self, body: Value) -> Result<Option<Value>> {
        self.client.post_json(self.resource.path(), body).await
    }

    pub async fn update(&self, id: &str, body: Value) -> Result<Option<Value>> {
        self.client
            .put_json(&self.resource.item_path(id), body)
            .await
    }

    pub async fn patch(&self, id: &str, body: Value) -> Result<Option<Value>> {
        self.client
            .patch_json(&self.resource.item_path(id), body)
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.client.delete(&self.resource.item_path(id)).await
    }
}

impl ApiClient {
    pub fn resource(&self, resource: Resource) -> Resources<'_> {
        Resources {
            client: self,
            resource,
        }
    }

    /// Downloads a rendered report and returns its raw bytes.
    pub async fn download_report(&self, kind: ReportKind) -> Result<Vec<u8>> {
        let res = self
            .send(ApiRequest::new(HttpMethod::Get, kind.download_path()))
            .await?
            .error_for_status()?;
        Ok(res.body)
    }
}

#[test]
fn test_resource_names() {
    assert_eq!(Resource::from_str("products").unwrap(), Resource::Products);
    assert_eq!(Resource::from_str("/sales").unwrap(), Resource::Sales);
    assert_eq!(Resource::from_str("fornecedores").unwrap(), Resource::Suppliers);
    assert_eq!(
        Resource::from_str("stock-movements").unwrap().path(),
        "/stock-movements"
    );
    assert_eq!(Resource::Categories.item_path("12"), "/categories/12");
    assert_eq!(Resource::Customers.to_string(), "customers");
    assert!(Resource::from_str("reports").is_err());
    assert!(Resource::from_str("").is_err());
}

#[test]
fn test_report_kind() {
    let kind = ReportKind::from_str("sales").unwrap();
    assert_eq!(kind, ReportKind::from_str("vendas").unwrap());
    assert_eq!(kind.download_path(), "/reports/vendas/download");
    let date = time::Date::from_calendar_date(2024, time::Month::March, 6).unwrap();
    assert_eq!(
        ReportKind::Stock.default_filename(date),
        "relatorio-estoque-2024-03-06.xlsx"
    );
    assert!(ReportKind::from_str("inventory").is_err());
}
