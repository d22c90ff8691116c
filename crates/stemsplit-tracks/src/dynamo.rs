//! DynamoDB-backed track store.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use tracing::debug;

use stemsplit_models::{SplitStemTrack, SplitTrackStatus, StemTrack, Track, TrackType};

use crate::error::{TrackResult, TrackStoreError};
use crate::store::{blind_index_update, TrackStore, MAX_TRACK_INDEX};

const ID_FIELD: &str = "song_id";
const TRACKS_ATTR: &str = "tracks";

const TRACK_TYPE_ATTR: &str = "track_type";
const ORIGINAL_URL_ATTR: &str = "original_url";
const STEM_URLS_ATTR: &str = "stem_urls";
const JOB_STATUS_ATTR: &str = "job_status";
const JOB_STATUS_MESSAGE_ATTR: &str = "job_status_message";
const JOB_STATUS_DEBUG_LOG_ATTR: &str = "job_status_debug_log";
const JOB_PROGRESS_ATTR: &str = "job_progress";

/// Configuration for the track store.
#[derive(Debug, Clone)]
pub struct TrackStoreConfig {
    /// Table holding one row per track list
    pub table_name: String,
    /// AWS region
    pub region: String,
    /// Endpoint override for local development
    pub endpoint_url: Option<String>,
}

impl TrackStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> TrackResult<Self> {
        Ok(Self {
            table_name: std::env::var("TRACKS_TABLE_NAME")
                .unwrap_or_else(|_| "TrackLists".to_string()),
            region: std::env::var("TRACKS_REGION")
                .map_err(|_| TrackStoreError::ConfigError("TRACKS_REGION not set".to_string()))?,
            endpoint_url: std::env::var("TRACKS_ENDPOINT_URL").ok(),
        })
    }
}

/// Track store backed by one DynamoDB row per track list.
#[derive(Clone)]
pub struct DynamoTrackStore {
    client: Client,
    table_name: String,
}

impl DynamoTrackStore {
    /// Create a new store from configuration.
    pub async fn new(config: TrackStoreConfig) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .load()
            .await;

        let mut builder = aws_sdk_dynamodb::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            table_name: config.table_name,
        }
    }

    async fn update_split_stem_at(
        &self,
        index: usize,
        track_list_id: &str,
        track_id: &str,
        track: &SplitStemTrack,
    ) -> TrackResult<()> {
        let update_expression = format!(
            "SET tracks[{index}].{JOB_STATUS_ATTR} = :newStatus, \
             tracks[{index}].{JOB_STATUS_MESSAGE_ATTR} = :newStatusMessage, \
             tracks[{index}].{JOB_STATUS_DEBUG_LOG_ATTR} = :newStatusDebugLog, \
             tracks[{index}].{JOB_PROGRESS_ATTR} = :newStatusProgress"
        );

        self.conditional_update(index, track_list_id, track_id, &update_expression, |req| {
            req.expression_attribute_values(
                ":newStatus",
                AttributeValue::S(track.job_status.as_str().to_string()),
            )
            .expression_attribute_values(
                ":newStatusMessage",
                AttributeValue::S(track.job_status_message.clone()),
            )
            .expression_attribute_values(
                ":newStatusDebugLog",
                AttributeValue::S(track.job_status_debug_log.clone()),
            )
            .expression_attribute_values(
                ":newStatusProgress",
                AttributeValue::N(track.job_progress.to_string()),
            )
        })
        .await
    }

    async fn update_stem_at(
        &self,
        index: usize,
        track_list_id: &str,
        track_id: &str,
        track: &StemTrack,
    ) -> TrackResult<()> {
        // The terminal write also strips the split-request bookkeeping fields.
        let update_expression = format!(
            "SET tracks[{index}].{TRACK_TYPE_ATTR} = :newTrackType, \
             tracks[{index}].{STEM_URLS_ATTR} = :newStemURLs \
             REMOVE tracks[{index}].{JOB_STATUS_ATTR}, \
             tracks[{index}].{JOB_STATUS_MESSAGE_ATTR}, \
             tracks[{index}].{JOB_STATUS_DEBUG_LOG_ATTR}, \
             tracks[{index}].{JOB_PROGRESS_ATTR}"
        );

        let stem_urls: HashMap<String, AttributeValue> = track
            .stem_urls
            .iter()
            .map(|(stem, url)| (stem.clone(), AttributeValue::S(url.clone())))
            .collect();

        self.conditional_update(index, track_list_id, track_id, &update_expression, |req| {
            req.expression_attribute_values(
                ":newTrackType",
                AttributeValue::S(track.track_type.as_str().to_string()),
            )
            .expression_attribute_values(":newStemURLs", AttributeValue::M(stem_urls))
        })
        .await
    }

    async fn conditional_update<F>(
        &self,
        index: usize,
        track_list_id: &str,
        track_id: &str,
        update_expression: &str,
        bind_values: F,
    ) -> TrackResult<()>
    where
        F: FnOnce(
            aws_sdk_dynamodb::operation::update_item::builders::UpdateItemFluentBuilder,
        )
            -> aws_sdk_dynamodb::operation::update_item::builders::UpdateItemFluentBuilder,
    {
        let condition_expression = format!("tracks[{index}].id = :trackID");

        let request = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key(ID_FIELD, AttributeValue::S(track_list_id.to_string()))
            .condition_expression(condition_expression)
            .update_expression(update_expression)
            .expression_attribute_values(":trackID", AttributeValue::S(track_id.to_string()));

        bind_values(request)
            .send()
            .await
            .map_err(|e| TrackStoreError::dynamo(e.to_string()))?;

        debug!(
            track_list_id,
            track_id, index, "Updated track at matched index"
        );
        Ok(())
    }
}

#[async_trait]
impl TrackStore for DynamoTrackStore {
    async fn get_track(&self, track_list_id: &str, track_id: &str) -> TrackResult<Track> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(ID_FIELD, AttributeValue::S(track_list_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| TrackStoreError::dynamo(e.to_string()))?;

        let item = output
            .item
            .ok_or_else(|| TrackStoreError::TrackListNotFound(track_list_id.to_string()))?;

        track_from_track_list(&item, track_id)
    }

    async fn set_track(
        &self,
        track_list_id: &str,
        track_id: &str,
        track: Track,
    ) -> TrackResult<()> {
        // The caller doesn't know the track's array position, so every write
        // is a conditional update retried across index guesses.
        match track {
            Track::SplitStem(split) => {
                blind_index_update(MAX_TRACK_INDEX, |index| {
                    self.update_split_stem_at(index, track_list_id, track_id, &split)
                })
                .await?;
            }
            Track::Stem(stem) => {
                blind_index_update(MAX_TRACK_INDEX, |index| {
                    self.update_stem_at(index, track_list_id, track_id, &stem)
                })
                .await?;
            }
        }

        Ok(())
    }
}

fn track_from_track_list(
    item: &HashMap<String, AttributeValue>,
    target_track_id: &str,
) -> TrackResult<Track> {
    let tracks = item
        .get(TRACKS_ATTR)
        .and_then(|v| v.as_l().ok())
        .ok_or(TrackStoreError::MissingField(TRACKS_ATTR))?;

    for entry in tracks {
        let fields = entry
            .as_m()
            .map_err(|_| TrackStoreError::MissingField("track object"))?;

        if string_field(fields, "id")? == target_track_id {
            return track_from_fields(fields);
        }
    }

    Err(TrackStoreError::TrackNotFound(target_track_id.to_string()))
}

fn track_from_fields(fields: &HashMap<String, AttributeValue>) -> TrackResult<Track> {
    let track_type = TrackType::parse(string_field(fields, TRACK_TYPE_ATTR)?)?;

    if track_type.is_split_request() {
        Ok(Track::SplitStem(SplitStemTrack {
            track_type,
            original_url: string_field(fields, ORIGINAL_URL_ATTR)?.to_string(),
            job_status: SplitTrackStatus::parse(string_field(fields, JOB_STATUS_ATTR)?)?,
            job_status_message: string_field(fields, JOB_STATUS_MESSAGE_ATTR)?.to_string(),
            job_status_debug_log: string_field(fields, JOB_STATUS_DEBUG_LOG_ATTR)?.to_string(),
            job_progress: number_field(fields, JOB_PROGRESS_ATTR)?,
        }))
    } else {
        let stem_urls = fields
            .get(STEM_URLS_ATTR)
            .and_then(|v| v.as_m().ok())
            .ok_or(TrackStoreError::MissingField(STEM_URLS_ATTR))?
            .iter()
            .map(|(stem, url)| {
                url.as_s()
                    .map(|s| (stem.clone(), s.clone()))
                    .map_err(|_| TrackStoreError::MissingField(STEM_URLS_ATTR))
            })
            .collect::<TrackResult<HashMap<String, String>>>()?;

        Ok(Track::Stem(StemTrack {
            track_type,
            stem_urls,
        }))
    }
}

fn string_field<'a>(
    fields: &'a HashMap<String, AttributeValue>,
    name: &'static str,
) -> TrackResult<&'a str> {
    fields
        .get(name)
        .and_then(|v| v.as_s().ok())
        .map(String::as_str)
        .ok_or(TrackStoreError::MissingField(name))
}

fn number_field(fields: &HashMap<String, AttributeValue>, name: &'static str) -> TrackResult<u32> {
    fields
        .get(name)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse().ok())
        .ok_or(TrackStoreError::MissingField(name))
}
