use std::path::{Path, PathBuf};

use bidcast_adapters::{page_rows, parse_envelope, BidEndpoint, SearchConfig};
use bidcast_core::normalize_rows;
use chrono::NaiveDate;

fn fixture_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/g2b/getBidPblancListInfoServc")
}

#[test]
fn fixture_pages_parse_and_normalize() {
    let endpoint = BidEndpoint::new("getBidPblancListInfoServc", "용역");
    let search = SearchConfig::new(
        NaiveDate::from_ymd_opt(2025, 3, 1).expect("date"),
        NaiveDate::from_ymd_opt(2025, 4, 1).expect("date"),
    )
    .with_keyword("콜센터");

    let mut rows = Vec::new();
    for page_no in 1..=3 {
        let bytes = std::fs::read(fixture_dir().join(format!("page_{page_no}.json"))).expect("fixture");
        let page = parse_envelope(&bytes).expect("envelope");
        assert_eq!(page.total_count, 250);
        rows.extend(page_rows(&page, &endpoint, &search));
    }

    let outcome = normalize_rows(&rows);
    let bid_nos: Vec<_> = outcome.records.iter().map(|r| r.bid_no.as_str()).collect();
    assert_eq!(
        bid_nos,
        vec!["R25BK00000001", "R25BK00000004", "R25BK00000005", "R25BK00000006"]
    );
    assert!(outcome.records.iter().all(|r| r.category == "용역"));
    assert_eq!(outcome.records[3].organization, "국세청");
}
