//! Carrier status vocabulary → [`NormalizedStatus`].
//!
//! Matching runs in two phases. The dictionary is scanned for every key that
//! occurs in the lower-cased input and the longest key wins, so that
//! `"non consegnata"` beats `"consegnata"`. When nothing in the dictionary
//! matches, the fallback stems are tried in table order.
use crate::model::NormalizedStatus;
use once_cell::sync::Lazy;
use regex::Regex;

use NormalizedStatus::*;

const DICTIONARY: &[(&str, NormalizedStatus)] = &[
    // held at depot
    ("in giacenza", InGiacenza),
    ("giacenza", InGiacenza),
    ("fermo deposito", InGiacenza),
    ("in deposito", InGiacenza),
    ("non consegnabile", InGiacenza),
    ("held at depot", InGiacenza),
    ("awaiting collection", InGiacenza),
    // delivered
    ("consegnata", Delivered),
    ("consegnato", Delivered),
    ("recapitata", Delivered),
    ("recapitato", Delivered),
    ("delivered", Delivered),
    // failed delivery; each negated form must outrank its delivered stem
    ("non consegnata", Exception),
    ("non consegnato", Exception),
    ("non recapitata", Exception),
    ("non recapitato", Exception),
    ("undelivered", Exception),
    ("not delivered", Exception),
    ("mancata consegna", Exception),
    ("tentativo di consegna fallito", Exception),
    ("destinatario assente", Exception),
    // in transit
    ("in transito", InTransit),
    ("transit", InTransit),
    ("partita", InTransit),
    ("preso in carico", InTransit),
    ("presa in carico", InTransit),
    ("departed", InTransit),
    // out for delivery
    ("in consegna", OutForDelivery),
    ("consegna prevista", OutForDelivery),
    ("out for delivery", OutForDelivery),
    // at destination
    ("arrivata in sede", AtDestination),
    ("arrived at destination", AtDestination),
    // exceptions
    ("eccezione", Exception),
    ("problema", Exception),
    ("exception", Exception),
    // created / pending
    ("spedizione generata", Created),
    ("label created", Created),
    ("in attesa di ritiro", PendingPickup),
    ("awaiting pickup", PendingPickup),
    // returned
    ("reso al mittente", Returned),
    ("respinta", Returned),
    ("returned to sender", Returned),
    // cancelled
    ("annullata", Cancelled),
    ("cancelled", Cancelled),
];

static FALLBACK: Lazy<Vec<(Regex, NormalizedStatus)>> = Lazy::new(|| {
    [
        (r"giacenz|fermo deposito|non consegnabil", InGiacenza),
        (r"\bnon (consegnat|recapitat)|mancata consegna|undeliver|not deliver", Exception),
        (r"consegnat|recapitat|deliver(ed|y completed)", Delivered),
        (r"transit|partit|partenza|depart", InTransit),
        (r"consegna prevista|in consegna|out for deliver", OutForDelivery),
        (r"destinatar|arrivat|arrived", AtDestination),
        (r"assente", Exception),
        (r"eccezion|problem|exception|anomalia", Exception),
        (r"generat|registrat|created", Created),
        (r"ritiro|pick ?up", PendingPickup),
        (r"\breso\b|return", Returned),
        (r"annullat|cancel", Cancelled),
    ]
    .into_iter()
    .filter_map(|(pattern, status)| Regex::new(pattern).ok().map(|re| (re, status)))
    .collect()
});

/// Map an arbitrary carrier status to the canonical enum. Never fails;
/// unrecognized input yields [`NormalizedStatus::Unknown`].
pub fn normalize(raw_status: &str) -> NormalizedStatus {
    let lower = raw_status.trim().to_lowercase();
    if lower.is_empty() {
        return Unknown;
    }

    let best = DICTIONARY
        .iter()
        .filter(|(key, _)| lower.contains(key))
        .max_by_key(|(key, _)| key.len());
    if let Some((_, status)) = best {
        return *status;
    }

    FALLBACK
        .iter()
        .find(|(re, _)| re.is_match(&lower))
        .map(|(_, status)| *status)
        .unwrap_or(Unknown)
}
