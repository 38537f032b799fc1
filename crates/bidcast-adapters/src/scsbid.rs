//! Award lookups against `ScsbidInfoService`: the winning amount, the opening
//! result's first-ranked bidder, and the failure reason for void bids.

use bidcast_core::BidRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{base_url_with_key, item_text, parse_amount, AdapterError, BidPage, SearchConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScsbidQuery {
    Amount,
    OpeningResult,
    Failing,
}

impl ScsbidQuery {
    pub fn path(self) -> &'static str {
        match self {
            ScsbidQuery::Amount => "getScsbidListSttusServc",
            ScsbidQuery::OpeningResult => "getOpengResultListInfoServcPPSSrch",
            ScsbidQuery::Failing => "getOpengResultListInfoFailing",
        }
    }

    fn inquiry_division(self) -> Option<u8> {
        match self {
            ScsbidQuery::Amount => Some(4),
            ScsbidQuery::OpeningResult => Some(3),
            ScsbidQuery::Failing => None,
        }
    }
}

pub fn scsbid_url(
    base_url: &str,
    service_key: &str,
    query: ScsbidQuery,
    bid_no: &str,
    classification_no: Option<&str>,
    search: &SearchConfig,
) -> Result<reqwest::Url, AdapterError> {
    let mut url = base_url_with_key(base_url, query.path(), service_key)?;
    let (begin, end) = search.window_params();
    {
        let mut pairs = url.query_pairs_mut();
        pairs
            .append_pair("pageNo", "1")
            .append_pair("numOfRows", "1")
            .append_pair("type", "json")
            .append_pair("bidNtceNo", bid_no)
            .append_pair("inqryBgnDt", &begin)
            .append_pair("inqryEndDt", &end);
        if let Some(division) = query.inquiry_division() {
            pairs.append_pair("inqryDiv", &division.to_string());
        }
        if let Some(classification) = classification_no {
            pairs.append_pair("bidClsfcNo", classification);
        }
    }
    Ok(url)
}

/// One entry of `opengCorpInfo`: `name^business no^representative^amount^rate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpeningCorp {
    pub name: String,
    #[serde(default)]
    pub business_no: String,
    #[serde(default)]
    pub representative: String,
    #[serde(default)]
    pub bid_amount: Option<f64>,
    #[serde(default)]
    pub bid_rate: Option<f64>,
}

/// Multiple bidders are `|`-separated; the first is the top-ranked one.
pub fn parse_opening_corp(raw: &str) -> Option<OpeningCorp> {
    let first = raw.split('|').next()?.trim();
    let mut parts = first.split('^').map(str::trim);
    let name = parts.next().filter(|n| !n.is_empty())?.to_string();
    let business_no = parts.next().unwrap_or_default().to_string();
    let representative = parts.next().unwrap_or_default().to_string();
    let bid_amount = parts.next().and_then(parse_amount);
    let bid_rate = parts.next().and_then(parse_amount);
    Some(OpeningCorp {
        name,
        business_no,
        representative,
        bid_amount,
        bid_rate,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinningBid {
    pub bid_no: String,
    #[serde(default)]
    pub winning_amount: Option<f64>,
    #[serde(default)]
    pub winner: Option<OpeningCorp>,
    #[serde(default)]
    pub classification_no: Option<String>,
    #[serde(default)]
    pub nobid_reason: Option<String>,
}

pub(crate) fn first_item_text(page: &BidPage, key: &str) -> Option<String> {
    page.items.first().and_then(|item: &JsonValue| item_text(item, key))
}

impl WinningBid {
    pub fn from_pages(bid_no: &str, amount: &BidPage, opening: &BidPage) -> Self {
        Self {
            bid_no: bid_no.to_string(),
            winning_amount: first_item_text(amount, "sucsfbidAmt").and_then(|a| parse_amount(&a)),
            winner: first_item_text(opening, "opengCorpInfo").and_then(|c| parse_opening_corp(&c)),
            classification_no: first_item_text(opening, "bidClsfcNo"),
            nobid_reason: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.winning_amount.is_none() && self.winner.is_none() && self.nobid_reason.is_none()
    }

    /// Award amount, falling back to the top bidder's offer.
    pub fn amount(&self) -> Option<f64> {
        self.winning_amount
            .or_else(|| self.winner.as_ref().and_then(|w| w.bid_amount))
    }

    /// Fill the award columns of an observed record; empty fields stay untouched.
    pub fn apply_to(&self, record: &mut BidRecord) {
        if record.is_forecast {
            return;
        }
        if let Some(winner) = &self.winner {
            record.winning_bidder = winner.name.clone();
        }
        if let Some(amount) = self.amount() {
            record.winning_amount = amount;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn page(items: JsonValue) -> BidPage {
        BidPage {
            total_count: 1,
            items: items.as_array().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn opening_corp_fields_split_on_carets() {
        let corp = parse_opening_corp("(주)한국고객센터^1234567890^김대표^3250000000^97.5|(주)다른업체^2^이^1^1")
            .expect("corp");
        assert_eq!(corp.name, "(주)한국고객센터");
        assert_eq!(corp.business_no, "1234567890");
        assert_eq!(corp.bid_amount, Some(3_250_000_000.0));
        assert_eq!(corp.bid_rate, Some(97.5));
        assert!(parse_opening_corp("^^^").is_none());
        assert!(parse_opening_corp("").is_none());
    }

    #[test]
    fn award_pages_combine_and_fill_the_record() {
        let amount = page(serde_json::json!([{"sucsfbidAmt": "3,100,000,000"}]));
        let opening = page(serde_json::json!([{"opengCorpInfo": "(주)콜센터^1^대표^3200000000^95", "bidClsfcNo": "1"}]));
        let bid = WinningBid::from_pages("R1", &amount, &opening);
        assert_eq!(bid.amount(), Some(3_100_000_000.0));
        assert_eq!(bid.classification_no.as_deref(), Some("1"));

        let date = NaiveDate::from_ymd_opt(2025, 3, 4).expect("date");
        let mut record = BidRecord::observed("서울특별시", "콜센터", date);
        bid.apply_to(&mut record);
        assert_eq!(record.winning_bidder, "(주)콜센터");
        assert_eq!(record.winning_amount, 3_100_000_000.0);
    }

    #[test]
    fn missing_award_amount_falls_back_to_top_bid() {
        let opening = page(serde_json::json!([{"opengCorpInfo": "업체^1^대표^1500^90"}]));
        let bid = WinningBid::from_pages("R2", &BidPage::default(), &opening);
        assert_eq!(bid.amount(), Some(1500.0));
        assert!(WinningBid::from_pages("R3", &BidPage::default(), &BidPage::default()).is_empty());
    }

    #[test]
    fn failing_lookup_url_carries_classification() {
        let search = SearchConfig::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"),
            NaiveDate::from_ymd_opt(2025, 12, 31).expect("date"),
        );
        let url = scsbid_url(
            crate::DEFAULT_SCSBID_BASE_URL,
            "key",
            ScsbidQuery::Failing,
            "R25BK00000001",
            Some("1"),
            &search,
        )
        .expect("url");
        assert!(url.path().ends_with("/getOpengResultListInfoFailing"));
        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["bidClsfcNo"], "1");
        assert_eq!(pairs["inqryEndDt"], "202512312359");
        assert!(!pairs.contains_key("inqryDiv"));
    }
}
