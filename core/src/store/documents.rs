use super::AnalyticsStore;
use crate::{
    channel::builder_for,
    error::{EngineError, EngineResult},
    query::Channel,
    types::ProjectId,
};
use rusqlite::{params_from_iter, types::Value as SqlValue};
use std::collections::BTreeMap;

/// One report document as a channel sync would write it.
#[derive(Debug, Clone)]
pub struct ChannelDocument {
    pub channel: Channel,
    pub project_id: ProjectId,
    /// Ad account id, or URL prefix for organic search.
    pub account_id: String,
    /// Report type, e.g. `campaign_performance_report`.
    pub doc_type: String,
    /// Report day as YYYYMMDD.
    pub day: i64,
    /// Entity id columns of the channel table, e.g. `campaign_id`.
    pub ids: BTreeMap<String, String>,
    pub value: serde_json::Value,
}

impl AnalyticsStore {
    // ── Channel documents ────────────────────────────────────────────

    pub fn insert_channel_document(&self, doc: &ChannelDocument) -> EngineResult<()> {
        let schema = builder_for(doc.channel)
            .map(|b| b.schema())
            .ok_or_else(|| EngineError::UnknownChannel {
                channel: doc.channel.as_str().to_string(),
            })?;

        let mut columns = vec!["project_id", schema.account_column, "type", "timestamp", "value"];
        let mut values = vec![
            SqlValue::Integer(doc.project_id),
            SqlValue::Text(doc.account_id.clone()),
            SqlValue::Text(doc.doc_type.clone()),
            SqlValue::Integer(doc.day),
            SqlValue::Text(doc.value.to_string()),
        ];
        for (column, id) in &doc.ids {
            let known = schema
                .objects
                .iter()
                .any(|o| o.id_column == Some(column.as_str()));
            if !known {
                return Err(EngineError::InvalidQuery(format!(
                    "{} documents have no id column '{column}'",
                    doc.channel
                )));
            }
            columns.push(column.as_str());
            values.push(SqlValue::Text(id.clone()));
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            schema.table,
            columns.join(", ")
        );
        self.anchor()?.execute(&sql, params_from_iter(values.iter()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::SqlExecutor;
    use crate::result::Cell;
    use serde_json::json;

    #[test]
    fn documents_land_in_the_channel_table() {
        let store = AnalyticsStore::in_memory().unwrap();
        store.migrate().unwrap();
        let doc = ChannelDocument {
            channel: Channel::SocialAds,
            project_id: 1,
            account_id: "act_1".into(),
            doc_type: "ad_insights".into(),
            day: 20230101,
            ids: BTreeMap::from([("ad_set_id".to_string(), "s1".to_string())]),
            value: json!({"impressions": 10}),
        };
        store.insert_channel_document(&doc).unwrap();
        let r = store
            .execute(
                "SELECT customer_ad_account_id, ad_set_id, json_extract(value, '$.impressions') FROM facebook_documents",
                &[],
            )
            .unwrap();
        assert_eq!(
            r.rows,
            vec![vec![Cell::Text("act_1".into()), Cell::Text("s1".into()), Cell::Int(10)]]
        );
    }

    #[test]
    fn unknown_id_column_and_union_channel_are_rejected() {
        let store = AnalyticsStore::in_memory().unwrap();
        store.migrate().unwrap();
        let mut doc = ChannelDocument {
            channel: Channel::PaidSearch,
            project_id: 1,
            account_id: "1".into(),
            doc_type: "campaign_performance_report".into(),
            day: 20230101,
            ids: BTreeMap::from([("ad_set_id".to_string(), "x".to_string())]),
            value: json!({}),
        };
        assert!(store.insert_channel_document(&doc).is_err());
        doc.ids.clear();
        doc.channel = Channel::AllChannels;
        assert!(matches!(
            store.insert_channel_document(&doc),
            Err(EngineError::UnknownChannel { .. })
        ));
    }
}
