//! Section submissions.
//!
//! Create sends sections as flat indexed form fields
//! (`sections[0][title]`, `sections[0][text]`, file `sections[0][img]`);
//! update sends a JSON array in the `sections` field plus indexed file
//! fields for replacement images. Both are parsed into the same ordered
//! list of [`SectionSubmission`].

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::ApiError;
use crate::forms::{MultipartForm, Upload};

lazy_static! {
    /// `sections[<index>][<title|text|img>]`
    static ref SECTION_FIELD: Regex =
        Regex::new(r"^sections\[(\d+)\]\[(title|text|img)\]$").unwrap();
}

#[derive(Debug, Clone)]
pub enum SectionImage {
    None,
    /// Keep an already stored file.
    Keep(String),
    /// Store a newly uploaded file.
    Upload(Upload),
}

#[derive(Debug, Clone)]
pub struct SectionSubmission {
    pub title: Option<String>,
    pub text: Option<String>,
    pub image: SectionImage,
}

fn image_field(index: usize) -> String {
    format!("sections[{}][img]", index)
}

/// Parses indexed section fields. Sections come out ordered by index.
pub fn from_indexed_fields(form: &mut MultipartForm) -> Result<Vec<SectionSubmission>, ApiError> {
    let mut by_index: BTreeMap<usize, (Option<String>, Option<String>)> = BTreeMap::new();

    for (name, value) in form.fields() {
        let Some(caps) = SECTION_FIELD.captures(name) else {
            continue;
        };
        let index: usize = caps[1]
            .parse()
            .map_err(|_| ApiError::bad_request(format!("Invalid section index in {}", name)))?;
        let entry = by_index.entry(index).or_default();
        match &caps[2] {
            "title" => entry.0 = Some(value.clone()),
            "text" => entry.1 = Some(value.clone()),
            // Images are file parts, a text `img` field carries nothing to store
            _ => {}
        }
    }

    Ok(by_index
        .into_iter()
        .map(|(index, (title, text))| SectionSubmission {
            title,
            text,
            image: form
                .take_file(&image_field(index))
                .map_or(SectionImage::None, SectionImage::Upload),
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct SectionEntry {
    index: Option<usize>,
    title: Option<String>,
    text: Option<String>,
    img: Option<String>,
}

/// Parses the JSON `sections` array sent on update.
///
/// Entry `i` (its `index`, or its position in the array) takes its image
/// from the file field `sections[i][img]` when one was uploaded, otherwise
/// from its `img` filename.
pub fn from_json(raw: &str, form: &mut MultipartForm) -> Result<Vec<SectionSubmission>, ApiError> {
    let entries: Vec<SectionEntry> = serde_json::from_str(raw)
        .map_err(|e| ApiError::bad_request(format!("Invalid sections payload: {}", e)))?;

    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(position, entry)| {
            let index = entry.index.unwrap_or(position);
            let image = match form.take_file(&image_field(index)) {
                Some(upload) => SectionImage::Upload(upload),
                None => match entry.img {
                    Some(img) if !img.is_empty() => SectionImage::Keep(img),
                    _ => SectionImage::None,
                },
            };
            SectionSubmission {
                title: entry.title,
                text: entry.text,
                image,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str) -> Upload {
        Upload::new(name, vec![1u8, 2, 3])
    }

    #[test]
    fn test_indexed_fields_are_ordered_numerically() {
        let mut form = MultipartForm::from_parts(
            &[
                ("sections[10][title]", "ten"),
                ("sections[2][title]", "two"),
                ("sections[2][text]", "two text"),
                ("sections[0][text]", "zero text"),
                ("caseLink", "acme"),
            ],
            vec![],
        );

        let sections = from_indexed_fields(&mut form).unwrap();
        let titles: Vec<Option<&str>> = sections.iter().map(|s| s.title.as_deref()).collect();
        assert_eq!(titles, vec![None, Some("two"), Some("ten")]);
        assert_eq!(sections[0].text.as_deref(), Some("zero text"));
        assert_eq!(sections[1].text.as_deref(), Some("two text"));
    }

    #[test]
    fn test_indexed_fields_pair_images() {
        let mut form = MultipartForm::from_parts(
            &[("sections[0][title]", "a"), ("sections[1][title]", "b")],
            vec![
                ("sections[1][img]", upload("b.png")),
                ("sections[7][img]", upload("orphan.png")),
            ],
        );

        let sections = from_indexed_fields(&mut form).unwrap();
        assert_eq!(sections.len(), 2);
        assert!(matches!(sections[0].image, SectionImage::None));
        match &sections[1].image {
            SectionImage::Upload(u) => assert_eq!(u.file_name, "b.png"),
            other => panic!("expected upload, got {:?}", other),
        }
    }

    #[test]
    fn test_indexed_fields_ignore_unrelated_names() {
        let mut form = MultipartForm::from_parts(
            &[("sections", "[]"), ("sections[x][title]", "bad"), ("sectionsfoo", "1")],
            vec![],
        );
        assert!(from_indexed_fields(&mut form).unwrap().is_empty());
    }

    #[test]
    fn test_json_keep_and_upload() {
        let mut form = MultipartForm::from_parts(&[], vec![("sections[1][img]", upload("new.png"))]);
        let raw = r#"[
            {"index": 0, "title": "kept", "text": "t0", "img": "old.jpg"},
            {"index": 1, "title": "replaced", "text": "t1", "img": "older.jpg"},
            {"index": 2, "title": "plain", "text": "t2"}
        ]"#;

        let sections = from_json(raw, &mut form).unwrap();
        assert_eq!(sections.len(), 3);
        assert!(matches!(&sections[0].image, SectionImage::Keep(f) if f == "old.jpg"));
        assert!(matches!(&sections[1].image, SectionImage::Upload(u) if u.file_name == "new.png"));
        assert!(matches!(sections[2].image, SectionImage::None));
        assert_eq!(sections[1].title.as_deref(), Some("replaced"));
    }

    #[test]
    fn test_json_index_defaults_to_position() {
        let mut form = MultipartForm::from_parts(&[], vec![("sections[1][img]", upload("x.png"))]);
        let sections = from_json(r#"[{"title": "a"}, {"title": "b"}]"#, &mut form).unwrap();
        assert!(matches!(sections[0].image, SectionImage::None));
        assert!(matches!(sections[1].image, SectionImage::Upload(_)));
    }

    #[test]
    fn test_json_empty_img_is_none() {
        let mut form = MultipartForm::default();
        let sections = from_json(r#"[{"title": "a", "img": ""}]"#, &mut form).unwrap();
        assert!(matches!(sections[0].image, SectionImage::None));
    }

    #[test]
    fn test_json_invalid_is_bad_request() {
        let mut form = MultipartForm::default();
        let err = from_json("not json", &mut form).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
