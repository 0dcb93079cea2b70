#[cfg(test)]
mod tests {
    use crate::browser::fake::{button, link, FakeBrowser, FakePage};
    use crate::browser::{BrowserDriver, DriverError};

    #[test]
    fn test_driver_error_classification() {
        assert!(matches!(
            DriverError::classify("Node is detached from document"),
            DriverError::Detached(_)
        ));
        assert!(matches!(
            DriverError::classify("Execution context was destroyed, most likely because of a navigation"),
            DriverError::NavigationInFlight(_)
        ));
        assert!(matches!(
            DriverError::classify("Request timed out"),
            DriverError::Timeout(_)
        ));
        assert!(matches!(
            DriverError::classify("Target closed"),
            DriverError::ContextLost(_)
        ));
        assert!(matches!(
            DriverError::classify("Could not find node with given id"),
            DriverError::NotFound(_)
        ));
        assert!(matches!(
            DriverError::classify("Invalid parameters"),
            DriverError::Protocol(_)
        ));
    }

    #[test]
    fn test_transient_split() {
        assert!(DriverError::Detached("x".into()).is_transient());
        assert!(DriverError::NavigationInFlight("x".into()).is_transient());
        assert!(DriverError::Timeout("x".into()).is_transient());
        assert!(!DriverError::ContextLost("x".into()).is_transient());
        assert!(!DriverError::NotFound("x".into()).is_transient());
        assert!(!DriverError::Script("x".into()).is_transient());
    }

    #[tokio::test]
    async fn test_fake_click_follows_links_and_history() {
        let home = FakePage::new("https://shop.test/", "Shop", vec![link("Deals", "/deals"), button("Cart")]);
        let browser = FakeBrowser::new().at(home);

        let snapshot = browser.snapshot().await.unwrap();
        let deals_selector = snapshot.elements[0].css_path.clone();

        browser.click(&deals_selector).await.unwrap();
        assert_eq!(browser.current_url(), "https://shop.test/deals");

        browser.back().await.unwrap();
        assert_eq!(browser.current_url(), "https://shop.test/");
        browser.forward().await.unwrap();
        assert_eq!(browser.current_url(), "https://shop.test/deals");
    }

    #[tokio::test]
    async fn test_fake_queued_failures_are_consumed_in_order() {
        let browser = FakeBrowser::new();
        browser.fail_next("navigate", DriverError::Timeout("slow".into()));

        assert!(browser.navigate("https://a.test").await.is_err());
        assert!(browser.navigate("https://a.test").await.is_ok());
        assert_eq!(browser.count("navigate"), 2);
        assert_eq!(browser.current_url(), "https://a.test/");
    }

    #[tokio::test]
    async fn test_fake_click_on_missing_selector() {
        let browser = FakeBrowser::new().at(FakePage::new("https://a.test/", "A", vec![]));
        let err = browser.click("#nope").await.unwrap_err();
        assert!(matches!(err, DriverError::NotFound(_)));
        assert!(!err.is_transient());
    }
}
