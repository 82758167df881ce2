use modgraph::{unique_providers, Provider, Token};
use proptest::prelude::*;

fn provider((key, value, multi): (u8, u8, bool)) -> Provider {
    let p = Provider::use_value(Token::key(format!("T{key}")), value);
    if multi {
        p.multi()
    } else {
        p
    }
}

fn decls() -> impl Strategy<Value = Vec<(u8, u8, bool)>> {
    prop::collection::vec((0u8..4, 0u8..3, any::<bool>()), 0..24)
}

proptest! {
    #[test]
    fn dedup_is_idempotent(input in decls()) {
        let list: Vec<Provider> = input.into_iter().map(provider).collect();
        let once = unique_providers(&list);
        let twice = unique_providers(&once);

        prop_assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(&twice) {
            prop_assert!(a.is_identical(b));
        }
    }

    #[test]
    fn at_most_one_single_provider_per_token(input in decls()) {
        let list: Vec<Provider> = input.into_iter().map(provider).collect();
        let out = unique_providers(&list);

        let mut singles: Vec<&Token> = out.iter().filter(|p| !p.is_multi()).map(Provider::token).collect();
        let before = singles.len();
        singles.sort();
        singles.dedup();
        prop_assert_eq!(before, singles.len());
    }

    #[test]
    fn last_single_declaration_wins(input in decls()) {
        let list: Vec<Provider> = input.into_iter().map(provider).collect();
        let out = unique_providers(&list);

        for p in out.iter().filter(|p| !p.is_multi()) {
            let last = list.iter().rev().find(|q| !q.is_multi() && q.token() == p.token());
            prop_assert!(last.is_some_and(|q| q.is_identical(p)));
        }
    }
}
