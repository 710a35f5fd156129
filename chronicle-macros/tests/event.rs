use chronicle::{DomainEvent, Named};

#[derive(DomainEvent)]
struct AccountOpened {
    #[allow(dead_code)]
    holder: String,
}

#[derive(DomainEvent)]
#[chronicle(name = "account.amount_deposited")]
struct AmountDeposited {
    #[allow(dead_code)]
    amount: i64,
}

#[test]
fn defaults_the_registered_name_to_the_struct_identifier() {
    assert_eq!(AccountOpened::NAME, "AccountOpened");
}

#[test]
fn honors_an_explicit_name_override() {
    assert_eq!(AmountDeposited::NAME, "account.amount_deposited");
}
