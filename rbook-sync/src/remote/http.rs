/// PostgREST-style HTTP remote
///
/// Each request carries the identity token as a bearer credential. Transport
/// failures are network-class; any non-success status is a rejection.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

use rbook_core::{ClassAssignment, Student};

use super::{AttendanceKey, AttendanceUpload, RemoteBackend};
use crate::error::{SyncError, SyncResult};

pub struct RestRemote {
    base_url: String,
    token: String,
    timeout: Duration,
    client: Client,
}

#[derive(Deserialize)]
struct SessionRow {
    id: String,
}

#[derive(Deserialize)]
struct TimetableRow {
    subject_id: Option<String>,
}

#[derive(Deserialize)]
struct SubjectRow {
    id: String,
}

#[derive(Serialize)]
struct NewSession<'a> {
    faculty_id: &'a str,
    slot_id: &'a str,
    date: &'a str,
    subject_id: &'a str,
    dept: &'a str,
    year: u8,
    section: &'a str,
    batch: Option<u32>,
    present_count: usize,
    absent_count: usize,
    od_count: usize,
    leave_count: usize,
    total_count: usize,
}

#[derive(Serialize)]
struct NewRecord<'a> {
    session_id: &'a str,
    student_id: &'a str,
    status: &'a str,
}

impl RestRemote {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            timeout,
            client,
        })
    }

    fn url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    async fn send(&self, request: RequestBuilder) -> SyncResult<Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::RemoteRejection(format!("{}: {}", status, body)));
        }
        Ok(response)
    }

    async fn fetch_rows<T: DeserializeOwned>(&self, request: RequestBuilder) -> SyncResult<Vec<T>> {
        let response = self.send(request).await?;
        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| SyncError::RemoteRejection(format!("unexpected response body: {}", e)))
    }

    fn transport_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.timeout.as_millis() as u64)
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl RemoteBackend for RestRemote {
    async fn fetch_assignments(&self, faculty_id: &str) -> SyncResult<Vec<ClassAssignment>> {
        let request = self
            .client
            .get(self.url("faculty_assignments"))
            .query(&[
                ("faculty_id", format!("eq.{}", faculty_id)),
                ("select", "dept,year,section,subject_name,subject_id".to_string()),
            ]);
        self.fetch_rows(request).await
    }

    async fn fetch_students(&self, dept: &str, year: u8, section: &str) -> SyncResult<Vec<Student>> {
        let request = self.client.get(self.url("students")).query(&[
            ("dept", format!("eq.{}", dept)),
            ("year", format!("eq.{}", year)),
            ("section", format!("eq.{}", section)),
            ("select", "id,name,roll_no,beacon_id,batch".to_string()),
            ("order", "roll_no.asc".to_string()),
        ]);
        self.fetch_rows(request).await
    }

    async fn delete_attendance(&self, key: &AttendanceKey) -> SyncResult<usize> {
        let request = self
            .client
            .delete(self.url("attendance_sessions"))
            .header("Prefer", "return=representation")
            .query(&[
                ("faculty_id", format!("eq.{}", key.faculty_id)),
                ("date", format!("eq.{}", key.date)),
                ("slot_id", format!("eq.{}", key.slot_id)),
                ("select", "id".to_string()),
            ]);
        let removed: Vec<SessionRow> = self.fetch_rows(request).await?;
        Ok(removed.len())
    }

    async fn insert_attendance(&self, upload: &AttendanceUpload) -> SyncResult<()> {
        let session = NewSession {
            faculty_id: &upload.faculty_id,
            slot_id: &upload.slot_id,
            date: &upload.date,
            subject_id: &upload.subject_id,
            dept: &upload.dept,
            year: upload.year,
            section: &upload.section,
            batch: upload.batch,
            present_count: upload.counts.present,
            absent_count: upload.counts.absent,
            od_count: upload.counts.od,
            leave_count: upload.counts.leave,
            total_count: upload.counts.total,
        };
        let request = self
            .client
            .post(self.url("attendance_sessions"))
            .header("Prefer", "return=representation")
            .json(&session);
        let created: Vec<SessionRow> = self.fetch_rows(request).await?;
        let session_id = created
            .first()
            .map(|row| row.id.clone())
            .ok_or_else(|| SyncError::RemoteRejection("session insert returned no row".to_string()))?;

        let records: Vec<NewRecord<'_>> = upload
            .marks
            .iter()
            .map(|mark| NewRecord {
                session_id: &session_id,
                student_id: &mark.student_id,
                status: mark.status.as_str(),
            })
            .collect();
        self.send(self.client.post(self.url("attendance_records")).json(&records))
            .await?;

        tracing::debug!(
            session_id = %session_id,
            records = records.len(),
            "Inserted attendance session"
        );
        Ok(())
    }

    async fn lookup_subject_by_slot(&self, slot_id: &str) -> SyncResult<Option<String>> {
        let request = self.client.get(self.url("timetable")).query(&[
            ("slot_id", format!("eq.{}", slot_id)),
            ("select", "subject_id".to_string()),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<TimetableRow> = self.fetch_rows(request).await?;
        Ok(rows.into_iter().next().and_then(|row| row.subject_id))
    }

    async fn lookup_subject_by_name(&self, name: &str) -> SyncResult<Option<String>> {
        let request = self.client.get(self.url("subjects")).query(&[
            ("name", format!("ilike.{}", name)),
            ("select", "id".to_string()),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<SubjectRow> = self.fetch_rows(request).await?;
        Ok(rows.into_iter().next().map(|row| row.id))
    }

    fn name(&self) -> &'static str {
        "rest"
    }
}
