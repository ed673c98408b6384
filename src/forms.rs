//! Collects a multipart request into plain text fields and file uploads.

use axum::body::Bytes;
use axum::extract::Multipart;
use std::collections::HashMap;

use crate::error::ApiError;

/// A file part of a multipart request.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Bytes,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Lowercased extension of the client-side filename, without the dot.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.file_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }
}

#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    files: HashMap<String, Upload>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = MultipartForm::default();

        while let Some(field) = multipart.next_field().await.map_err(|e| {
            tracing::error!("Multipart error: {}", e);
            ApiError::bad_request("Invalid multipart data")
        })? {
            let name = match field.name() {
                Some(name) => name.to_string(),
                None => continue,
            };

            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let bytes = field.bytes().await.map_err(|e| {
                        tracing::error!("Failed to read upload bytes: {}", e);
                        ApiError::bad_request("Failed to read file data")
                    })?;
                    // Browsers send an empty part for a file input left blank
                    if file_name.is_empty() && bytes.is_empty() {
                        continue;
                    }
                    form.files.insert(name, Upload { file_name, bytes });
                }
                None => {
                    let text = field.text().await.map_err(|e| {
                        tracing::error!("Failed to read form field {}: {}", name, e);
                        ApiError::bad_request("Invalid multipart data")
                    })?;
                    form.fields.insert(name, text);
                }
            }
        }

        Ok(form)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    pub fn take_file(&mut self, name: &str) -> Option<Upload> {
        self.files.remove(name)
    }

    #[cfg(test)]
    pub fn from_parts(fields: &[(&str, &str)], files: Vec<(&str, Upload)>) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            files: files
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}
