use rusqlite::params;

use super::Store;
use crate::errors::StoreError;
use crate::models::{HttpKeywordParams, Persona, Proxy};

fn json_vec<T: serde::de::DeserializeOwned>(raw: &str) -> Vec<T> {
    serde_json::from_str(raw).unwrap_or_default()
}

impl Store {
    // ── HTTP keyword params ───────────────────────────────────────────

    pub fn upsert_http_keyword_params(
        &self,
        params_row: &HttpKeywordParams,
    ) -> Result<(), StoreError> {
        let persona_ids = serde_json::to_string(&params_row.persona_ids)
            .map_err(|e| StoreError::Other(e.into()))?;
        let proxy_ids = serde_json::to_string(&params_row.proxy_ids)
            .map_err(|e| StoreError::Other(e.into()))?;
        let set_ids = serde_json::to_string(&params_row.keyword_set_ids)
            .map_err(|e| StoreError::Other(e.into()))?;
        let adhoc = serde_json::to_string(&params_row.adhoc_keywords)
            .map_err(|e| StoreError::Other(e.into()))?;
        self.conn.execute(
            "INSERT INTO http_keyword_params
                 (campaign_id, persona_ids, proxy_ids, keyword_set_ids, adhoc_keywords)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (campaign_id) DO UPDATE SET
                 persona_ids = excluded.persona_ids,
                 proxy_ids = excluded.proxy_ids,
                 keyword_set_ids = excluded.keyword_set_ids,
                 adhoc_keywords = excluded.adhoc_keywords",
            params![
                params_row.campaign_id,
                persona_ids,
                proxy_ids,
                set_ids,
                adhoc
            ],
        )?;
        Ok(())
    }

    pub fn get_http_keyword_params(
        &self,
        campaign_id: i64,
    ) -> Result<Option<HttpKeywordParams>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT persona_ids, proxy_ids, keyword_set_ids, adhoc_keywords
             FROM http_keyword_params WHERE campaign_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![campaign_id], |row| {
            let persona_raw: String = row.get(0)?;
            let proxy_raw: String = row.get(1)?;
            let sets_raw: String = row.get(2)?;
            let adhoc_raw: String = row.get(3)?;
            Ok(HttpKeywordParams {
                campaign_id,
                persona_ids: json_vec(&persona_raw),
                proxy_ids: json_vec(&proxy_raw),
                keyword_set_ids: json_vec(&sets_raw),
                adhoc_keywords: json_vec(&adhoc_raw),
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    // ── Personas / proxies ────────────────────────────────────────────

    pub fn insert_persona(&self, persona: &Persona) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO personas (id, name, user_agent, accept_language, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                persona.id,
                persona.name,
                persona.user_agent,
                persona.accept_language,
                persona.enabled as i64
            ],
        )?;
        Ok(())
    }

    pub fn get_persona(&self, id: &str) -> Result<Option<Persona>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, user_agent, accept_language, enabled FROM personas WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], |row| {
            Ok(Persona {
                id: row.get(0)?,
                name: row.get(1)?,
                user_agent: row.get(2)?,
                accept_language: row.get(3)?,
                enabled: row.get::<_, i64>(4)? != 0,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn insert_proxy(&self, proxy: &Proxy) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO proxies (id, url, enabled, healthy, persona_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                proxy.id,
                proxy.url,
                proxy.enabled as i64,
                proxy.healthy as i64,
                proxy.persona_id
            ],
        )?;
        Ok(())
    }

    pub fn get_proxy(&self, id: &str) -> Result<Option<Proxy>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, url, enabled, healthy, persona_id FROM proxies WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], proxy_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Proxies linked to any of the given personas, enabled+healthy first.
    pub fn list_proxies_by_personas(
        &self,
        persona_ids: &[String],
    ) -> Result<Vec<Proxy>, StoreError> {
        if persona_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; persona_ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, url, enabled, healthy, persona_id FROM proxies
             WHERE persona_id IN ({placeholders})
             ORDER BY (enabled AND healthy) DESC, id"
        ))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(persona_ids), proxy_from_row)?;
        let mut proxies = Vec::new();
        for row in rows {
            proxies.push(row?);
        }
        Ok(proxies)
    }

    pub fn list_proxies(&self) -> Result<Vec<Proxy>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, url, enabled, healthy, persona_id FROM proxies
             ORDER BY (enabled AND healthy) DESC, id",
        )?;
        let rows = stmt.query_map([], proxy_from_row)?;
        let mut proxies = Vec::new();
        for row in rows {
            proxies.push(row?);
        }
        Ok(proxies)
    }

    // ── Keyword sets ──────────────────────────────────────────────────

    pub fn insert_keyword_set(&self, name: &str, patterns: &[String]) -> Result<i64, StoreError> {
        let raw = serde_json::to_string(patterns).map_err(|e| StoreError::Other(e.into()))?;
        self.conn.execute(
            "INSERT INTO keyword_sets (name, patterns) VALUES (?1, ?2)",
            params![name, raw],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_keyword_set_patterns(&self, id: i64) -> Result<Vec<String>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT patterns FROM keyword_sets WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Database(other)),
            })?;
        Ok(raw.map(|r| json_vec(&r)).unwrap_or_default())
    }
}

fn proxy_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Proxy> {
    Ok(Proxy {
        id: row.get(0)?,
        url: row.get(1)?,
        enabled: row.get::<_, i64>(2)? != 0,
        healthy: row.get::<_, i64>(3)? != 0,
        persona_id: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_round_trip() -> anyhow::Result<()> {
        let store = Store::open_in_memory()?;
        let campaign = store.create_campaign("acme", "lead_generation")?;

        let row = HttpKeywordParams {
            campaign_id: campaign.id,
            persona_ids: vec!["p1".into(), "p2".into()],
            proxy_ids: vec!["x1".into()],
            keyword_set_ids: vec![1, 2],
            adhoc_keywords: vec!["plumber".into()],
        };
        store.upsert_http_keyword_params(&row)?;
        let fetched = store.get_http_keyword_params(campaign.id)?.unwrap();
        assert_eq!(fetched.persona_ids, vec!["p1", "p2"]);
        assert_eq!(fetched.proxy_ids, vec!["x1"]);
        assert_eq!(fetched.keyword_set_ids, vec![1, 2]);

        assert!(store.get_http_keyword_params(9999)?.is_none());
        Ok(())
    }

    #[test]
    fn test_proxies_by_persona_prefers_enabled_healthy() -> anyhow::Result<()> {
        let store = Store::open_in_memory()?;
        store.insert_persona(&Persona {
            id: "p1".into(),
            name: "desktop".into(),
            user_agent: "Mozilla/5.0".into(),
            accept_language: None,
            enabled: true,
        })?;
        store.insert_proxy(&Proxy {
            id: "x-sick".into(),
            url: "http://proxy-a:8080".into(),
            enabled: true,
            healthy: false,
            persona_id: Some("p1".into()),
        })?;
        store.insert_proxy(&Proxy {
            id: "x-ok".into(),
            url: "http://proxy-b:8080".into(),
            enabled: true,
            healthy: true,
            persona_id: Some("p1".into()),
        })?;

        let proxies = store.list_proxies_by_personas(&["p1".to_string()])?;
        assert_eq!(proxies.len(), 2);
        assert_eq!(proxies[0].id, "x-ok");
        Ok(())
    }

    #[test]
    fn test_keyword_set_round_trip() -> anyhow::Result<()> {
        let store = Store::open_in_memory()?;
        let id = store.insert_keyword_set("trades", &["plumber".into(), "roofing".into()])?;
        let patterns = store.get_keyword_set_patterns(id)?;
        assert_eq!(patterns, vec!["plumber", "roofing"]);
        assert!(store.get_keyword_set_patterns(404)?.is_empty());
        Ok(())
    }
}
