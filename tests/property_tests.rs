/// Property-based tests using proptest
/// Tests invariants that should hold for all inputs
use proptest::prelude::*;

use lead_scoring_engine::models::{
    CanonicalLead, Debt, DebtKind, DebtStatus, EnrichedLead, EnrichmentFragment, Source,
};
use lead_scoring_engine::normalization::{deduplicate, normalize_name, normalize_phone, NormalizationStats};
use lead_scoring_engine::scoring::score;

fn debt_kind() -> impl Strategy<Value = DebtKind> {
    prop_oneof![
        Just(DebtKind::Bank),
        Just(DebtKind::Mfo),
        Just(DebtKind::Tax),
        Just(DebtKind::Utilities),
        Just(DebtKind::Other),
    ]
}

fn debt(source: Source) -> impl Strategy<Value = Debt> {
    (0u32..2_000_000, debt_kind()).prop_map(move |(amount, kind)| Debt {
        amount: f64::from(amount),
        kind,
        creditor: "Кредитор".to_string(),
        status: DebtStatus::Active,
        date: None,
        source,
    })
}

prop_compose! {
    fn enriched_lead()(
        debts in prop::collection::vec(debt(Source::Fssp), 0..6),
        has_property in any::<bool>(),
        is_bankrupt in any::<bool>(),
        inn_active in any::<bool>(),
        flagged in any::<bool>(),
        recent in any::<bool>(),
    ) -> EnrichedLead {
        let mut lead = EnrichedLead::from_canonical(CanonicalLead::new("ИВАНОВ ИВАН", "", "770708389312"));
        lead.total_debt = debts.iter().map(|d| d.amount).sum();
        lead.debts = debts;
        lead.has_property = has_property;
        lead.is_bankrupt = is_bankrupt;
        lead.inn_active = inn_active;
        lead.flagged_deceased_or_wanted = flagged;
        lead.has_recent_court_order = recent;
        lead
    }
}

fn fragment(source: Source) -> impl Strategy<Value = EnrichmentFragment> {
    (
        prop::collection::vec(debt(source), 0..3),
        prop::option::of(any::<bool>()),
        prop::option::of(any::<bool>()),
        prop::option::of(any::<bool>()),
        0usize..4,
    )
        .prop_map(move |(debts, flag_a, flag_b, recent, count)| {
            let mut fragment = EnrichmentFragment::empty(source);
            fragment.debts = debts;
            fragment.is_bankrupt = flag_a;
            fragment.inn_active = flag_b;
            fragment.flagged_deceased_or_wanted = flag_a;
            fragment.has_property = flag_b;
            fragment.property_count = count;
            fragment.has_recent_court_order = recent;
            fragment
        })
}

// Property: phone normalization is idempotent and never panics
proptest! {
    #[test]
    fn phone_normalization_never_panics(phone in "[0-9+() -]{0,20}") {
        let _ = normalize_phone(&phone);
    }

    #[test]
    fn phone_normalization_is_idempotent(
        prefix in prop_oneof![Just(""), Just("8"), Just("7"), Just("+7")],
        number in 9000000000u64..=9999999999u64,
        use_parens in any::<bool>(),
        use_dash in any::<bool>(),
    ) {
        let digits = number.to_string();
        let body = match (use_parens, use_dash) {
            (true, true) => format!("({}) {}-{}-{}", &digits[..3], &digits[3..6], &digits[6..8], &digits[8..]),
            (true, false) => format!("({}) {}", &digits[..3], &digits[3..]),
            (false, true) => format!("{}-{}-{}", &digits[..3], &digits[3..6], &digits[6..]),
            (false, false) => digits.clone(),
        };
        let raw = format!("{} {}", prefix, body);

        let once = normalize_phone(&raw);
        prop_assert_eq!(&once, &format!("+7{}", digits));
        prop_assert_eq!(normalize_phone(&once), once);
    }

    #[test]
    fn name_normalization_is_idempotent(name in "[а-яА-Яa-zA-Z0-9 .-]{0,40}") {
        let once = normalize_name(&name);
        prop_assert_eq!(normalize_name(&once), once);
    }
}

// Property: scores stay in range and reasons are always three strings
proptest! {
    #[test]
    fn score_is_bounded(lead in enriched_lead(), threshold in 0u32..1_000_000) {
        let scored = score(&lead, f64::from(threshold));
        prop_assert!(scored.score <= 100);
        prop_assert_eq!(scored.reasons.len(), 3);
    }

    #[test]
    fn bankrupt_or_dead_leads_are_never_targets(lead in enriched_lead()) {
        let scored = score(&lead, 250000.0);
        if lead.is_bankrupt || !lead.inn_active || lead.flagged_deceased_or_wanted {
            prop_assert!(!scored.is_target);
        }
        if lead.is_bankrupt {
            prop_assert_eq!(scored.score, 0);
        }
    }

    #[test]
    fn scoring_is_deterministic(lead in enriched_lead()) {
        prop_assert_eq!(score(&lead, 250000.0), score(&lead, 250000.0));
    }
}

/// Every ordering of `0..n`.
fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for shorter in permutations(n - 1) {
        for slot in 0..=shorter.len() {
            let mut order = shorter.clone();
            order.insert(slot, n - 1);
            out.push(order);
        }
    }
    out
}

// Property: applying fragments one by one gives the same lead in any order
proptest! {
    #[test]
    fn merge_is_order_independent(
        fssp in fragment(Source::Fssp),
        fedresurs in fragment(Source::Fedresurs),
        rosreestr in fragment(Source::Rosreestr),
        courts in fragment(Source::Courts),
        tax in fragment(Source::Tax),
    ) {
        let base = EnrichedLead::from_canonical(CanonicalLead::new("ИВАНОВ ИВАН", "", ""));
        let fragments = [fssp, fedresurs, rosreestr, courts, tax];

        let mut expected = base.clone();
        for fragment in fragments.iter().cloned() {
            expected.apply(fragment);
        }

        let orders = permutations(fragments.len());
        prop_assert_eq!(orders.len(), 120);

        for order in orders {
            let mut lead = base.clone();
            for idx in &order {
                lead.apply(fragments[*idx].clone());
            }
            // Debts arrive in fragment order; stable sort restores per-source order.
            lead.debts.sort_by_key(|d| d.source);
            prop_assert_eq!(&lead, &expected, "order {:?}", order);
        }
    }
}

// Property: deduplication keeps one record per tax-ID and per name + birth date,
// nameless records included
proptest! {
    #[test]
    fn dedup_leaves_unique_tax_ids(
        records in prop::collection::vec((0u8..4, 0u8..4, 0u8..3), 0..30)
    ) {
        let tax_ids = ["", "770708389312", "500100732259", "7707083893"];
        let leads: Vec<CanonicalLead> = records
            .iter()
            .map(|(name, tax, phone)| {
                CanonicalLead::new(
                    ["", "ИВАНОВ А", "ИВАНОВ Б", "ИВАНОВ В"][*name as usize],
                    format!("+7916000000{}", phone),
                    tax_ids[*tax as usize],
                )
            })
            .collect();

        let mut stats = NormalizationStats::default();
        let unique = deduplicate(leads.clone(), &mut stats);

        let mut seen_tax = std::collections::HashSet::new();
        let mut seen_name = std::collections::HashSet::new();
        for lead in &unique {
            if lead.tax_id.is_empty() {
                prop_assert!(seen_name.insert((lead.full_name.clone(), lead.date_of_birth)));
            } else {
                prop_assert!(seen_tax.insert(lead.tax_id.clone()));
            }
        }

        let removed = stats.exact_duplicates + stats.tax_id_duplicates + stats.name_dob_duplicates;
        prop_assert_eq!(unique.len() + removed, leads.len());
    }
}
