/**
 * Case Service
 * Keeps case rows, their sections and their image files in step
 */
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::{HashMap, HashSet};

use crate::db::models::{Case, CaseList, CaseSection, CaseWithSections, NewCaseSection};
use crate::error::ApiError;
use crate::forms::{MultipartForm, Upload};
use crate::images::{EncodeOptions, ImageBatch, ImageStore};
use crate::services::sections::{self, SectionImage, SectionSubmission};

const CASE_COLUMNS: &str = "id, case_img, case_link, site_link, title_desktop, title_mobile, \
     sphere, sphere_color, site_img, site_img_mobile, what, problem, aim, user_id, created_at, updated_at";

const SECTION_COLUMNS: &str = "id, case_id, position, title, text, img, created_at, updated_at";

// ============================================================================
// Inputs
// ============================================================================

/// Text fields every case carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseFields {
    pub case_link: String,
    pub site_link: String,
    pub title_desktop: String,
    pub title_mobile: String,
    pub sphere: String,
    pub sphere_color: String,
    pub what: String,
    pub problem: String,
    pub aim: String,
}

impl CaseFields {
    pub fn from_form(form: &MultipartForm) -> Result<Self, ApiError> {
        let required = |name: &str| -> Result<String, ApiError> {
            match form.field(name) {
                Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
                _ => Err(ApiError::bad_request(format!("{} is required", name))),
            }
        };

        Ok(Self {
            case_link: required("caseLink")?,
            site_link: required("siteLink")?,
            title_desktop: required("titleDesktop")?,
            title_mobile: required("titleMobile")?,
            sphere: required("sphere")?,
            sphere_color: required("sphere_color")?,
            what: required("what")?,
            problem: required("problem")?,
            aim: required("aim")?,
        })
    }
}

/// The three fixed image uploads. Each is optional at parse time.
#[derive(Debug, Clone, Default)]
pub struct CaseImages {
    pub case_img: Option<Upload>,
    pub site_img: Option<Upload>,
    pub site_img_mobile: Option<Upload>,
}

impl CaseImages {
    fn from_form(form: &mut MultipartForm) -> Self {
        Self {
            case_img: form.take_file("caseImg"),
            site_img: form.take_file("siteImg"),
            site_img_mobile: form.take_file("siteImgMobile"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewCase {
    pub fields: CaseFields,
    pub images: CaseImages,
    pub sections: Vec<SectionSubmission>,
}

impl NewCase {
    pub fn from_form(mut form: MultipartForm) -> Result<Self, ApiError> {
        Ok(Self {
            fields: CaseFields::from_form(&form)?,
            images: CaseImages::from_form(&mut form),
            sections: sections::from_indexed_fields(&mut form)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CaseUpdate {
    pub fields: CaseFields,
    pub images: CaseImages,
    /// `None` leaves the stored sections untouched.
    pub sections: Option<Vec<SectionSubmission>>,
}

impl CaseUpdate {
    pub fn from_form(mut form: MultipartForm) -> Result<Self, ApiError> {
        let fields = CaseFields::from_form(&form)?;
        let images = CaseImages::from_form(&mut form);
        let sections = match form.field("sections").map(str::to_string) {
            Some(raw) => Some(sections::from_json(&raw, &mut form)?),
            None => None,
        };
        Ok(Self {
            fields,
            images,
            sections,
        })
    }
}

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Clone)]
pub struct CaseService {
    pool: SqlitePool,
    images: ImageStore,
}

impl CaseService {
    pub fn new(pool: SqlitePool, images: ImageStore) -> Self {
        Self { pool, images }
    }

    pub fn image_store(&self) -> &ImageStore {
        &self.images
    }

    /// Stores a new case, its images and its sections.
    ///
    /// Every failure is reported as a bad request. Nothing is left behind
    /// when it fails: staged images are removed and the transaction rolls back.
    pub async fn create(&self, input: NewCase) -> Result<Case, ApiError> {
        let NewCase {
            fields,
            images,
            sections,
        } = input;

        let (case_img, site_img, site_img_mobile) =
            match (images.case_img, images.site_img, images.site_img_mobile) {
                (Some(a), Some(b), Some(c)) => (a, b, c),
                _ => {
                    return Err(ApiError::bad_request(
                        "caseImg, siteImg and siteImgMobile are required",
                    ))
                }
            };

        let mut batch = ImageBatch::new(&self.images);
        let result = self
            .create_with_batch(
                &mut batch,
                fields,
                [case_img, site_img, site_img_mobile],
                sections,
            )
            .await;

        match result {
            Ok(case) => {
                tracing::info!(case_id = case.id, case_link = %case.case_link, "case created");
                Ok(case)
            }
            Err(e) => {
                batch.rollback().await;
                Err(e.into_bad_request())
            }
        }
    }

    async fn create_with_batch(
        &self,
        batch: &mut ImageBatch<'_>,
        fields: CaseFields,
        [case_img, site_img, site_img_mobile]: [Upload; 3],
        submissions: Vec<SectionSubmission>,
    ) -> Result<Case, ApiError> {
        let case_img = batch.stage(&case_img, EncodeOptions::ORIGINAL).await?;
        let site_img = batch.stage(&site_img, EncodeOptions::ORIGINAL).await?;
        let site_img_mobile = batch.stage(&site_img_mobile, EncodeOptions::ORIGINAL).await?;
        let new_sections = stage_sections(batch, submissions, EncodeOptions::ORIGINAL).await?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let case = sqlx::query_as::<_, Case>(&format!(
            r#"
            INSERT INTO "case" (case_img, case_link, site_link, title_desktop, title_mobile,
                sphere, sphere_color, site_img, site_img_mobile, what, problem, aim,
                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {}
            "#,
            CASE_COLUMNS
        ))
        .bind(&case_img)
        .bind(&fields.case_link)
        .bind(&fields.site_link)
        .bind(&fields.title_desktop)
        .bind(&fields.title_mobile)
        .bind(&fields.sphere)
        .bind(&fields.sphere_color)
        .bind(&site_img)
        .bind(&site_img_mobile)
        .bind(&fields.what)
        .bind(&fields.problem)
        .bind(&fields.aim)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        insert_sections(&mut tx, case.id, &new_sections).await?;

        batch.finalize().await?;
        tx.commit().await?;
        batch.commit();

        Ok(case)
    }

    /// All cases with their sections.
    pub async fn list(&self) -> Result<CaseList, ApiError> {
        let cases = sqlx::query_as::<_, Case>(&format!(
            r#"SELECT {} FROM "case" ORDER BY id"#,
            CASE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let sections = sqlx::query_as::<_, CaseSection>(&format!(
            "SELECT {} FROM case_section ORDER BY case_id, position, id",
            SECTION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut by_case: HashMap<i64, Vec<CaseSection>> = HashMap::new();
        for section in sections {
            by_case.entry(section.case_id).or_default().push(section);
        }

        let rows: Vec<CaseWithSections> = cases
            .into_iter()
            .map(|case| {
                let sections = by_case.remove(&case.id).unwrap_or_default();
                CaseWithSections { case, sections }
            })
            .collect();

        Ok(CaseList {
            count: rows.len() as i64,
            rows,
        })
    }

    /// The case with this id, or `None`.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<CaseWithSections>, ApiError> {
        let case = sqlx::query_as::<_, Case>(&format!(
            r#"SELECT {} FROM "case" WHERE id = ?"#,
            CASE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match case {
            Some(case) => Ok(Some(self.with_sections(case).await?)),
            None => Ok(None),
        }
    }

    /// The first case with this link. Not-found error when there is none.
    pub async fn find_by_link(&self, case_link: &str) -> Result<CaseWithSections, ApiError> {
        let case = sqlx::query_as::<_, Case>(&format!(
            r#"SELECT {} FROM "case" WHERE case_link = ? ORDER BY id LIMIT 1"#,
            CASE_COLUMNS
        ))
        .bind(case_link)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Case not found"))?;

        self.with_sections(case).await
    }

    async fn with_sections(&self, case: Case) -> Result<CaseWithSections, ApiError> {
        let sections = sqlx::query_as::<_, CaseSection>(&format!(
            "SELECT {} FROM case_section WHERE case_id = ? ORDER BY position, id",
            SECTION_COLUMNS
        ))
        .bind(case.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(CaseWithSections { case, sections })
    }

    /// Replaces a case's fields, any submitted images and (if sent) its sections.
    ///
    /// Files made obsolete by the update are removed once the new rows are
    /// committed.
    pub async fn update(&self, id: i64, input: CaseUpdate) -> Result<CaseWithSections, ApiError> {
        let current = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::bad_request("Case not found"))?;

        let mut batch = ImageBatch::new(&self.images);
        let obsolete = match self.update_with_batch(&mut batch, &current, input).await {
            Ok(obsolete) => obsolete,
            Err(e) => {
                batch.rollback().await;
                return Err(e);
            }
        };

        self.images.remove_all(&obsolete).await;
        tracing::info!(case_id = id, removed_images = obsolete.len(), "case updated");

        self.find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::bad_request("Case not found"))
    }

    /// Writes the update and returns the filenames it made obsolete.
    async fn update_with_batch(
        &self,
        batch: &mut ImageBatch<'_>,
        current: &CaseWithSections,
        input: CaseUpdate,
    ) -> Result<Vec<String>, ApiError> {
        let CaseUpdate {
            fields,
            images,
            sections: submissions,
        } = input;
        let mut obsolete = Vec::new();

        let (case_img, old_case_img) =
            replace_image(batch, images.case_img, &current.case.case_img).await?;
        let (site_img, old_site_img) =
            replace_image(batch, images.site_img, &current.case.site_img).await?;
        let (site_img_mobile, old_site_img_mobile) =
            replace_image(batch, images.site_img_mobile, &current.case.site_img_mobile).await?;
        obsolete.extend([old_case_img, old_site_img, old_site_img_mobile].into_iter().flatten());

        let new_sections = match submissions {
            Some(submissions) => {
                let owned: HashSet<&str> = current
                    .sections
                    .iter()
                    .filter_map(|s| s.img.as_deref())
                    .collect();
                let mut seen = HashSet::new();
                for submission in &submissions {
                    if let SectionImage::Keep(name) = &submission.image {
                        if !owned.contains(name.as_str()) {
                            return Err(ApiError::bad_request(format!(
                                "Unknown section image: {}",
                                name
                            )));
                        }
                        if !seen.insert(name.as_str()) {
                            return Err(ApiError::bad_request(format!(
                                "Duplicate section image: {}",
                                name
                            )));
                        }
                    }
                }

                let new_sections =
                    stage_sections(batch, submissions, EncodeOptions::BOUNDED).await?;
                let kept: HashSet<&str> =
                    new_sections.iter().filter_map(|s| s.img.as_deref()).collect();
                obsolete.extend(
                    owned
                        .into_iter()
                        .filter(|name| !kept.contains(name))
                        .map(str::to_string),
                );
                Some(new_sections)
            }
            None => None,
        };

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE "case"
            SET case_img = ?, case_link = ?, site_link = ?, title_desktop = ?, title_mobile = ?,
                sphere = ?, sphere_color = ?, site_img = ?, site_img_mobile = ?,
                what = ?, problem = ?, aim = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&case_img)
        .bind(&fields.case_link)
        .bind(&fields.site_link)
        .bind(&fields.title_desktop)
        .bind(&fields.title_mobile)
        .bind(&fields.sphere)
        .bind(&fields.sphere_color)
        .bind(&site_img)
        .bind(&site_img_mobile)
        .bind(&fields.what)
        .bind(&fields.problem)
        .bind(&fields.aim)
        .bind(Utc::now())
        .bind(current.case.id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(ApiError::bad_request("Case not found"));
        }

        if let Some(new_sections) = &new_sections {
            sqlx::query("DELETE FROM case_section WHERE case_id = ?")
                .bind(current.case.id)
                .execute(&mut *tx)
                .await?;
            insert_sections(&mut tx, current.case.id, new_sections).await?;
        }

        batch.finalize().await?;
        tx.commit().await?;
        batch.commit();

        Ok(obsolete)
    }

    /// Deletes a case, its sections and every image it references.
    pub async fn delete(&self, id: i64) -> Result<(), ApiError> {
        let current = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::bad_request("Case not found"))?;

        sqlx::query(r#"DELETE FROM "case" WHERE id = ?"#)
            .bind(id)
            .execute(&self.pool)
            .await?;

        // Best-effort: the row is already gone
        let images = current.all_images();
        self.images.remove_all(&images).await;

        tracing::info!(case_id = id, removed_images = images.len(), "case deleted");
        Ok(())
    }
}

/// Stages a replacement for a fixed image. Returns the filename to store
/// and, when replaced, the old filename.
async fn replace_image(
    batch: &mut ImageBatch<'_>,
    upload: Option<Upload>,
    current: &str,
) -> Result<(String, Option<String>), ApiError> {
    match upload {
        Some(upload) => {
            let name = batch.stage(&upload, EncodeOptions::BOUNDED).await?;
            Ok((name, Some(current.to_string())))
        }
        None => Ok((current.to_string(), None)),
    }
}

/// Stages uploaded section images and resolves every submission to a row.
async fn stage_sections(
    batch: &mut ImageBatch<'_>,
    submissions: Vec<SectionSubmission>,
    options: EncodeOptions,
) -> Result<Vec<NewCaseSection>, ApiError> {
    let mut rows = Vec::with_capacity(submissions.len());
    for submission in submissions {
        let img = match submission.image {
            SectionImage::None => None,
            SectionImage::Keep(name) => Some(name),
            SectionImage::Upload(upload) => Some(batch.stage(&upload, options).await?),
        };
        rows.push(NewCaseSection {
            title: submission.title,
            text: submission.text,
            img,
        });
    }
    Ok(rows)
}

async fn insert_sections(
    tx: &mut Transaction<'_, Sqlite>,
    case_id: i64,
    sections: &[NewCaseSection],
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    for (position, section) in sections.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO case_section (case_id, position, title, text, img, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(case_id)
        .bind(position as i64)
        .bind(&section.title)
        .bind(&section.text)
        .bind(&section.img)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
