use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{
    CabinetSettingsRecord, ClientRecord, Database, MatterRecord, TimeEntryRecord,
};
use crate::error::DatabaseError;

/// Where a resolved hourly rate came from, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Entry,
    Assignment,
    Matter,
    Member,
    Cabinet,
}

/// Pick the most specific hourly rate that is set.
///
/// Precedence: entry override, matter assignment, matter, tenant membership,
/// cabinet default.
pub fn resolve_hourly_rate(
    entry_rate: Option<Decimal>,
    assignment_rate: Option<Decimal>,
    matter_rate: Option<Decimal>,
    member_rate: Option<Decimal>,
    cabinet_rate: Decimal,
) -> (Decimal, RateSource) {
    [
        (entry_rate, RateSource::Entry),
        (assignment_rate, RateSource::Assignment),
        (matter_rate, RateSource::Matter),
        (member_rate, RateSource::Member),
    ]
    .into_iter()
    .find_map(|(rate, source)| rate.map(|r| (r, source)))
    .unwrap_or((cabinet_rate, RateSource::Cabinet))
}

/// VAT rate (percent) applicable to work on `matter` for `client`.
pub fn resolve_vat_rate(
    client: &ClientRecord,
    matter: &MatterRecord,
    settings: &CabinetSettingsRecord,
) -> Decimal {
    if client.vat_exempt {
        return Decimal::ZERO;
    }
    matter.vat_rate.unwrap_or(settings.default_vat_rate)
}

#[derive(Debug, Clone, Default)]
struct MatterRates {
    matter_rate: Option<Decimal>,
    assignments: HashMap<Uuid, Decimal>,
}

/// Rate lookup tables for a set of matters, loaded once per computation.
#[derive(Debug, Clone)]
pub struct RateBook {
    cabinet_rate: Decimal,
    member_rates: HashMap<Uuid, Decimal>,
    matters: HashMap<Uuid, MatterRates>,
}

impl RateBook {
    pub fn new(cabinet_rate: Decimal) -> Self {
        Self {
            cabinet_rate,
            member_rates: HashMap::new(),
            matters: HashMap::new(),
        }
    }

    pub fn with_member_rate(mut self, profile_id: Uuid, rate: Decimal) -> Self {
        self.member_rates.insert(profile_id, rate);
        self
    }

    pub fn with_matter_rate(mut self, matter_id: Uuid, rate: Option<Decimal>) -> Self {
        self.matters.entry(matter_id).or_default().matter_rate = rate;
        self
    }

    pub fn with_assignment_rate(
        mut self,
        matter_id: Uuid,
        profile_id: Uuid,
        rate: Decimal,
    ) -> Self {
        self.matters
            .entry(matter_id)
            .or_default()
            .assignments
            .insert(profile_id, rate);
        self
    }

    /// Load member, matter, and assignment rates for `matter_ids`.
    pub async fn load(
        db: &dyn Database,
        tenant_id: Uuid,
        settings: &CabinetSettingsRecord,
        matter_ids: &[Uuid],
    ) -> Result<Self, DatabaseError> {
        let mut book = Self::new(settings.default_hourly_rate);
        for member in db.list_memberships(tenant_id).await? {
            if let Some(rate) = member.hourly_rate {
                book.member_rates.insert(member.profile_id, rate);
            }
        }
        for matter_id in matter_ids {
            let Some(matter) = db.get_matter(tenant_id, *matter_id).await? else {
                continue;
            };
            let mut rates = MatterRates {
                matter_rate: matter.hourly_rate,
                assignments: HashMap::new(),
            };
            for assignment in db.list_assignments(tenant_id, *matter_id).await? {
                if let Some(rate) = assignment.hourly_rate {
                    rates.assignments.insert(assignment.profile_id, rate);
                }
            }
            book.matters.insert(*matter_id, rates);
        }
        Ok(book)
    }

    pub fn rate_for(&self, entry: &TimeEntryRecord) -> (Decimal, RateSource) {
        let matter = self.matters.get(&entry.matter_id);
        resolve_hourly_rate(
            entry.hourly_rate,
            matter.and_then(|m| m.assignments.get(&entry.profile_id).copied()),
            matter.and_then(|m| m.matter_rate),
            self.member_rates.get(&entry.profile_id).copied(),
            self.cabinet_rate,
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::db::{ClientKind, MatterStatus};
    use crate::timesheet::RoundingMode;
    use crate::timesheet::tests::entry;

    fn settings() -> CabinetSettingsRecord {
        CabinetSettingsRecord {
            tenant_id: Uuid::nil(),
            legal_name: "Cabinet Test".to_string(),
            address: None,
            vat_number: None,
            currency: "EUR".to_string(),
            default_vat_rate: dec!(20),
            default_hourly_rate: dec!(150),
            rounding_increment_minutes: 6,
            rounding_mode: RoundingMode::Up,
            invoice_prefix: "F".to_string(),
            credit_note_prefix: "AV".to_string(),
            payment_terms_days: 30,
            updated_at: Utc::now(),
        }
    }

    fn client(vat_exempt: bool) -> ClientRecord {
        ClientRecord {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            name: "Acme".to_string(),
            name_normalized: "acme".to_string(),
            kind: ClientKind::Company,
            email: None,
            phone: None,
            address: None,
            vat_number: None,
            vat_exempt,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn matter(vat_rate: Option<Decimal>) -> MatterRecord {
        MatterRecord {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            client_id: Uuid::new_v4(),
            reference: "M-1".to_string(),
            title: "Advice".to_string(),
            status: MatterStatus::Open,
            hourly_rate: None,
            vat_rate,
            opened_on: None,
            closed_on: None,
            description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn hourly_rate_precedence() {
        let r = resolve_hourly_rate(
            Some(dec!(1)),
            Some(dec!(2)),
            Some(dec!(3)),
            Some(dec!(4)),
            dec!(5),
        );
        assert_eq!(r, (dec!(1), RateSource::Entry));
        let r = resolve_hourly_rate(None, Some(dec!(2)), Some(dec!(3)), Some(dec!(4)), dec!(5));
        assert_eq!(r, (dec!(2), RateSource::Assignment));
        let r = resolve_hourly_rate(None, None, Some(dec!(3)), Some(dec!(4)), dec!(5));
        assert_eq!(r, (dec!(3), RateSource::Matter));
        let r = resolve_hourly_rate(None, None, None, Some(dec!(4)), dec!(5));
        assert_eq!(r, (dec!(4), RateSource::Member));
        let r = resolve_hourly_rate(None, None, None, None, dec!(5));
        assert_eq!(r, (dec!(5), RateSource::Cabinet));
    }

    #[test]
    fn vat_rate_prefers_exemption_then_matter() {
        let s = settings();
        assert_eq!(resolve_vat_rate(&client(true), &matter(Some(dec!(10))), &s), Decimal::ZERO);
        assert_eq!(resolve_vat_rate(&client(false), &matter(Some(dec!(10))), &s), dec!(10));
        assert_eq!(resolve_vat_rate(&client(false), &matter(None), &s), dec!(20));
    }

    #[test]
    fn rate_book_resolves_per_entry() {
        let matter_id = Uuid::new_v4();
        let partner = Uuid::new_v4();
        let associate = Uuid::new_v4();
        let trainee = Uuid::new_v4();
        let book = RateBook::new(dec!(150))
            .with_member_rate(associate, dec!(180))
            .with_member_rate(partner, dec!(300))
            .with_matter_rate(matter_id, Some(dec!(220)))
            .with_assignment_rate(matter_id, partner, dec!(350));

        let e = entry(matter_id, partner, "2026-01-05", 60, true);
        assert_eq!(book.rate_for(&e), (dec!(350), RateSource::Assignment));
        let e = entry(matter_id, associate, "2026-01-05", 60, true);
        assert_eq!(book.rate_for(&e), (dec!(220), RateSource::Matter));
        let other = entry(Uuid::new_v4(), associate, "2026-01-05", 60, true);
        assert_eq!(book.rate_for(&other), (dec!(180), RateSource::Member));
        let e = entry(Uuid::new_v4(), trainee, "2026-01-05", 60, true);
        assert_eq!(book.rate_for(&e), (dec!(150), RateSource::Cabinet));

        let mut overridden = entry(matter_id, partner, "2026-01-05", 60, true);
        overridden.hourly_rate = Some(dec!(90));
        assert_eq!(book.rate_for(&overridden), (dec!(90), RateSource::Entry));
    }
}
