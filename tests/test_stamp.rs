//! Integration tests for the visual stamp.

mod common;

use chrono::{TimeZone, Utc};
use pdf_sealer::document::PdfDocument;
use pdf_sealer::stamp::{StampConfig, VisualStamper};
use pdf_sealer::Error;

fn timestamp() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 9, 45, 0).unwrap()
}

mod overlay {
    use super::*;

    #[test]
    fn test_stamp_shows_signer_and_date_on_page_one() {
        let output = VisualStamper::default()
            .stamp(&common::one_page_pdf(), "alice", &timestamp())
            .unwrap();
        let content = common::page_content(&output, 0);

        assert!(content.contains("(DIGITALLY SIGNED BY ALICE) Tj"));
        assert!(content.contains("(Date: 2025-01-15 09:45:00 UTC) Tj"));
        assert!(content.contains("(Quarterly report) Tj"));
        assert_eq!(content.matches("BT").count(), 2);
    }

    #[test]
    fn test_only_first_page_changes() {
        let input = common::two_page_pdf();
        let output = VisualStamper::default().stamp(&input, "bob", &timestamp()).unwrap();

        let mut doc = PdfDocument::from_bytes(output.clone()).unwrap();
        assert_eq!(doc.page_count().unwrap(), 2);
        assert!(common::page_content(&output, 0).contains("DIGITALLY SIGNED BY BOB"));
        assert_eq!(common::page_content(&output, 1), common::page_content(&input, 1));
    }

    #[test]
    fn test_compressed_content_is_kept() {
        let output = VisualStamper::default()
            .stamp(&common::compressed_page_pdf(), "carol", &timestamp())
            .unwrap();
        let content = common::page_content(&output, 0);
        let body = content.find("(Compressed body) Tj").unwrap();
        let title = content.find("(DIGITALLY SIGNED BY CAROL) Tj").unwrap();
        assert!(body < title);
    }

    #[test]
    fn test_custom_placement() {
        let config = StampConfig {
            x: 300.0,
            y: 40.0,
            line_gap: 20.0,
            date_format: "%d.%m.%Y".to_string(),
            ..StampConfig::default()
        };
        let output = VisualStamper::new(config)
            .stamp(&common::one_page_pdf(), "dave", &timestamp())
            .unwrap();
        let content = common::page_content(&output, 0);
        assert!(content.contains("300 40 Td"));
        assert!(content.contains("0 -20 Td"));
        assert!(content.contains("(Date: 15.01.2025) Tj"));
    }

    #[test]
    fn test_stamped_output_is_a_full_rewrite() {
        let input = common::one_page_pdf();
        let output = VisualStamper::default().stamp(&input, "erin", &timestamp()).unwrap();
        assert!(output.starts_with(b"%PDF-1.4"));
        assert_eq!(output.windows(9).filter(|w| w == b"startxref").count(), 1);
    }
}

mod rejected_input {
    use super::*;

    #[test]
    fn test_empty_bytes() {
        let result = VisualStamper::default().stamp(&[], "alice", &timestamp());
        assert!(matches!(result, Err(Error::EmptyDocument)));
    }

    #[test]
    fn test_zero_pages() {
        let result = VisualStamper::default().stamp(&common::zero_page_pdf(), "alice", &timestamp());
        assert!(matches!(result, Err(Error::EmptyDocument)));
    }

    #[test]
    fn test_shallow_nesting_is_accepted() {
        let output = VisualStamper::default()
            .stamp(&common::deeply_nested_pdf(8), "alice", &timestamp())
            .unwrap();
        assert!(common::page_content(&output, 0).contains("DIGITALLY SIGNED BY ALICE"));
    }

    #[test]
    fn test_pathological_nesting_is_unsupported() {
        for depth in [5_000, 200_000] {
            let result = VisualStamper::default().stamp(&common::deeply_nested_pdf(depth), "alice", &timestamp());
            assert!(matches!(result, Err(Error::UnsupportedDocument(_))), "depth {}", depth);
        }
    }

    #[test]
    fn test_not_a_pdf() {
        let result = VisualStamper::default().stamp(b"GIF89a....", "alice", &timestamp());
        assert!(matches!(result, Err(Error::UnsupportedDocument(_))));
    }
}
