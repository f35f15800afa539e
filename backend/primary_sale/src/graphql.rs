//! Project metadata source backed by the platform's GraphQL API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::clients::ProjectSource;
use crate::errors::{Result, SaleError};
use crate::types::{Address, Currency, MinterConfiguration, OwnedToken, Project, H256};

const PROJECT_QUERY: &str = r#"
query GetProject($id: String!) {
  projects_metadata_by_pk(id: $id) {
    id
    project_id
    contract_address
    artist_address
    name
    complete
    auction_start_time
    auction_end_time
    currency_symbol
    currency_address
    minter_configuration {
      merkle_root
      allowlisted_projects
      minter { address minter_type }
    }
  }
}
"#;

const ALLOWLIST_QUERY: &str = r#"
query GetAllowlist($projectId: String!) {
  minter_allowlist_addresses(where: { project_id: { _eq: $projectId } }) {
    address
  }
}
"#;

const OWNED_TOKENS_QUERY: &str = r#"
query GetOwnedTokens($owners: [String!]!, $projectIds: [String!]!) {
  tokens_metadata(
    where: { owner_address: { _in: $owners }, project_id: { _in: $projectIds } }
    order_by: { invocation: asc }
  ) {
    contract_address
    token_id
    owner_address
    project_id
  }
}
"#;

const VAULTS_QUERY: &str = r#"
query GetVaults($delegate: String!) {
  delegations(where: { delegate: { _eq: $delegate } }) {
    vault
  }
}
"#;

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ProjectData {
    projects_metadata_by_pk: Option<RawProject>,
}

#[derive(Debug, Deserialize)]
struct RawProject {
    id: String,
    project_id: String,
    contract_address: Address,
    artist_address: Address,
    name: String,
    complete: bool,
    auction_start_time: Option<DateTime<Utc>>,
    auction_end_time: Option<DateTime<Utc>>,
    currency_symbol: Option<String>,
    currency_address: Option<Address>,
    minter_configuration: Option<RawMinterConfiguration>,
}

#[derive(Debug, Deserialize)]
struct RawMinterConfiguration {
    merkle_root: Option<H256>,
    #[serde(default)]
    allowlisted_projects: Option<Vec<String>>,
    minter: Option<RawMinter>,
}

#[derive(Debug, Deserialize)]
struct RawMinter {
    address: Address,
    minter_type: String,
}

impl RawProject {
    fn into_project(self) -> Result<Project> {
        let project_index = self
            .project_id
            .parse()
            .map_err(|_| SaleError::GraphQl(format!("invalid project index {}", self.project_id)))?;

        let minter = self.minter_configuration.and_then(|config| {
            config.minter.map(|minter| MinterConfiguration {
                address: minter.address,
                minter_type: minter.minter_type,
                merkle_root: config.merkle_root,
                allowlisted_projects: config.allowlisted_projects.unwrap_or_default(),
            })
        });

        let currency = match self.currency_symbol {
            Some(symbol) => Currency {
                symbol,
                address: self.currency_address,
            },
            None => Currency::default(),
        };

        Ok(Project {
            id: self.id,
            project_index,
            core_contract: self.contract_address,
            artist_address: self.artist_address,
            name: self.name,
            complete: self.complete,
            auction_start_time: self.auction_start_time,
            auction_end_time: self.auction_end_time,
            currency,
            minter,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AllowlistData {
    minter_allowlist_addresses: Vec<AllowlistEntry>,
}

#[derive(Debug, Deserialize)]
struct AllowlistEntry {
    address: Address,
}

#[derive(Debug, Deserialize)]
struct OwnedTokensData {
    tokens_metadata: Vec<RawToken>,
}

#[derive(Debug, Deserialize)]
struct RawToken {
    contract_address: Address,
    token_id: String,
    owner_address: Address,
    project_id: String,
}

#[derive(Debug, Deserialize)]
struct VaultsData {
    delegations: Vec<VaultEntry>,
}

#[derive(Debug, Deserialize)]
struct VaultEntry {
    vault: Address,
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GraphQlProjectSource {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GraphQlProjectSource {
    pub fn new(client: Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        }
    }

    async fn query<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let body: GraphQlResponse<T> = request.send().await?.error_for_status()?.json().await?;
        unwrap_response(body)
    }
}

fn unwrap_response<T>(body: GraphQlResponse<T>) -> Result<T> {
    if let Some(errors) = body.errors.filter(|errors| !errors.is_empty()) {
        let message = errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(SaleError::GraphQl(message));
    }
    body.data
        .ok_or_else(|| SaleError::GraphQl("response carried no data".to_string()))
}

#[async_trait]
impl ProjectSource for GraphQlProjectSource {
    async fn fetch_project(&self, project_id: &str) -> Result<Project> {
        let data: ProjectData = self
            .query(PROJECT_QUERY, json!({ "id": project_id }))
            .await?;
        let raw = data
            .projects_metadata_by_pk
            .ok_or_else(|| SaleError::ProjectNotFound(project_id.to_string()))?;
        debug!(project_id, "Project metadata loaded");
        raw.into_project()
    }

    async fn fetch_allowlist(&self, project: &Project) -> Result<Vec<Address>> {
        let data: AllowlistData = self
            .query(ALLOWLIST_QUERY, json!({ "projectId": project.id }))
            .await?;
        Ok(data
            .minter_allowlist_addresses
            .into_iter()
            .map(|entry| entry.address)
            .collect())
    }

    async fn fetch_owned_tokens(
        &self,
        owners: &[Address],
        project_ids: &[String],
    ) -> Result<Vec<OwnedToken>> {
        let data: OwnedTokensData = self
            .query(
                OWNED_TOKENS_QUERY,
                json!({ "owners": owners, "projectIds": project_ids }),
            )
            .await?;
        data.tokens_metadata
            .into_iter()
            .map(|token| {
                let token_id = token
                    .token_id
                    .parse()
                    .map_err(|_| SaleError::GraphQl(format!("invalid token id {}", token.token_id)))?;
                Ok(OwnedToken {
                    contract_address: token.contract_address,
                    token_id,
                    owner: token.owner_address,
                    project_id: token.project_id,
                })
            })
            .collect()
    }

    async fn fetch_delegation_vaults(&self, delegate: Address) -> Result<Vec<Address>> {
        let data: VaultsData = self
            .query(VAULTS_QUERY, json!({ "delegate": delegate }))
            .await?;
        Ok(data.delegations.into_iter().map(|entry| entry.vault).collect())
    }
}
