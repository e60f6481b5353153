use cdn_scan_client::ports::parse_ports_str;

#[test]
fn parse_commas_ranges_and_comments() {
    let input = r#"
        # CDN edge ports
        443, 80      # the usual pair
        8443
        2053-2055
        2054         # duplicate
        # blank line follows

    "#;

    let ports = parse_ports_str(input).expect("parse ok");
    // Dedup, preserve insertion order of first appearance
    assert_eq!(ports, vec![443, 80, 8443, 2053, 2054, 2055]);
}

#[test]
fn settings_form_single_line() {
    let ports = parse_ports_str("443,80,8443,2053,2083,2087,2096").expect("parse ok");
    assert_eq!(ports, vec![443, 80, 8443, 2053, 2083, 2087, 2096]);
}

#[test]
fn invalid_port_rejected() {
    assert!(parse_ports_str("0").is_err());
    assert!(parse_ports_str("443,65536").is_err());
}
