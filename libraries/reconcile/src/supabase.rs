//! Utilities for syncing against a Supabase (PostgREST) database.
//! Every table is expected to carry a `user_id` column; row-level security does the rest.

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SupabaseConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SupabaseError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("failed to parse {operation} response: {source}. Body: {body}")]
    Parse {
        operation: String,
        body: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug)]
pub struct SupabaseClient {
    http: reqwest::Client,
    config: SupabaseConfig,
}

/// A row as uploaded: the record's own fields plus the owning user.
#[derive(serde::Serialize)]
struct UserRow<'a, T> {
    user_id: &'a str,
    #[serde(flatten)]
    record: &'a T,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &SupabaseConfig {
        &self.config
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/rest/v1/{table}",
            self.config.supabase_url.trim_end_matches('/')
        )
    }

    /// Fetch every row of `table` owned by `user_id`.
    pub async fn select_for_user<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        user_id: &str,
        access_token: &str,
    ) -> Result<Vec<T>, SupabaseError> {
        let operation = format!("select from {table}");
        let response = self
            .http
            .get(self.table_url(table))
            .query(&[("user_id", format!("eq.{user_id}")), ("select", "*".to_string())])
            .header("apikey", &self.config.supabase_anon_key)
            .header("Authorization", format!("Bearer {access_token}"))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SupabaseError::Status {
                operation,
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|source| SupabaseError::Parse {
            operation,
            body,
            source,
        })
    }

    /// Insert or overwrite rows, matching existing ones on the `on_conflict` columns.
    /// Returns the number of rows sent.
    pub async fn upsert<T: serde::Serialize>(
        &self,
        table: &str,
        on_conflict: &str,
        user_id: &str,
        rows: &[T],
        access_token: &str,
    ) -> Result<usize, SupabaseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let rows: Vec<UserRow<'_, T>> = rows
            .iter()
            .map(|record| UserRow { user_id, record })
            .collect();

        log::info!("Uploading {} row(s) to {table}", rows.len());

        let response = self
            .http
            .post(self.table_url(table))
            .query(&[("on_conflict", on_conflict)])
            .header("apikey", &self.config.supabase_anon_key)
            .header("Authorization", format!("Bearer {access_token}"))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&rows)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Failed to upload rows to {table}: {status} - {body}");
            return Err(SupabaseError::Status {
                operation: format!("upsert into {table}"),
                status: status.as_u16(),
                body,
            });
        }

        Ok(rows.len())
    }
}
