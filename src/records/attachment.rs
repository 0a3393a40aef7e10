use std::path::{Path, PathBuf};

/// Bill or voucher file attached to an expense form
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Attachment {
    #[default]
    None,
    /// Already stored on the server (relative media path); never re-uploaded
    Existing(String),
    /// Local file to upload with the next save
    Upload(PathBuf),
}

impl Attachment {
    pub fn from_existing(reference: Option<&str>) -> Self {
        match reference {
            Some(r) if !r.trim().is_empty() => Attachment::Existing(r.to_string()),
            _ => Attachment::None,
        }
    }

    /// Interpret form input: "" or "-" clears, anything else is a local path to upload
    pub fn from_input(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "-" {
            Attachment::None
        } else {
            Attachment::Upload(PathBuf::from(trimmed))
        }
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, Attachment::None)
    }

    pub fn upload_path(&self) -> Option<&Path> {
        match self {
            Attachment::Upload(path) => Some(path),
            _ => None,
        }
    }

    pub fn display(&self) -> String {
        match self {
            Attachment::None => "-".to_string(),
            Attachment::Existing(reference) => reference.clone(),
            Attachment::Upload(path) => format!("upload: {}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_existing() {
        assert_eq!(Attachment::from_existing(None), Attachment::None);
        assert_eq!(Attachment::from_existing(Some("  ")), Attachment::None);
        assert_eq!(
            Attachment::from_existing(Some("/media/bills/a.pdf")),
            Attachment::Existing("/media/bills/a.pdf".to_string())
        );
    }

    #[test]
    fn test_from_input() {
        assert_eq!(Attachment::from_input("-"), Attachment::None);
        let upload = Attachment::from_input(" ./voucher.png ");
        assert!(upload.is_present());
        assert_eq!(upload.upload_path(), Some(Path::new("./voucher.png")));
    }
}
