use spot_exchange::instrument::*;

#[test]
fn asset_display_and_parse() {
    assert_eq!(Asset::BTC.to_string(), "BTC");
    assert_eq!(Asset::ETH.to_string(), "ETH");
    assert_eq!(Asset::USDC.to_string(), "USDC");

    assert_eq!("BTC".parse::<Asset>().unwrap(), Asset::BTC);
    assert_eq!("USDC".parse::<Asset>().unwrap(), Asset::USDC);
    let e = "DOGE".parse::<Asset>().unwrap_err();
    assert!(e.contains("unsupported currency"));
    // codes are case sensitive
    assert!("btc".parse::<Asset>().is_err());
}

#[test]
fn pair_display_and_parse_supported() {
    assert_eq!(BTC_USDC.to_string(), "BTC-USDC");
    assert_eq!(ETH_USDC.code(), "ETH-USDC");
    assert_eq!("BTC-USDC".parse::<Pair>().unwrap(), BTC_USDC);
    assert!("BTC-EUR".parse::<Pair>().unwrap_err().contains("unsupported"));
}

#[test]
fn every_pair_is_quoted_in_usdc() {
    for p in Pair::supported() {
        assert_eq!(p.quote, QUOTE_ASSET);
        assert_eq!(*p, Pair::crypto_usdc(p.base));
        assert_eq!(p.code().parse::<Pair>().unwrap(), *p);
    }
}

#[test]
fn currency_resolves_to_its_book() {
    assert_eq!(Pair::for_currency("BTC").unwrap(), BTC_USDC);
    assert_eq!(Pair::for_currency("ETH").unwrap(), ETH_USDC);
    assert!(Pair::for_currency("USDC").unwrap_err().contains("not tradable"));
    assert!(Pair::for_currency("XRP").unwrap_err().contains("unsupported currency"));
}

#[test]
fn serde_uses_plain_strings() {
    assert_eq!(serde_json::to_string(&BTC_USDC).unwrap(), "\"BTC-USDC\"");
    assert_eq!(serde_json::to_string(&Asset::USDC).unwrap(), "\"USDC\"");
    let p: Pair = serde_json::from_str("\"ETH-USDC\"").unwrap();
    assert_eq!(p, ETH_USDC);

    let bad = r#"{ "base": "BTC", "quote": "USDC" }"#;
    assert!(serde_json::from_str::<Pair>(bad).is_err());
    assert!(serde_json::from_str::<Asset>("\"LTC\"").is_err());
}

#[test]
fn popular_currencies_cover_every_asset_once() {
    assert_eq!(Asset::all(), &[Asset::BTC, Asset::ETH, Asset::USDC]);
}
