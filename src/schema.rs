//! Database schema definitions
//!
//! Constants for the `sales` reference table used by the pattern rules, the
//! sample-data seeder and the built-in fallback context.

/// Sales table schema
pub mod sales {
    /// Table name
    pub const TABLE: &str = "sales";
    /// Primary key column
    pub const ID: &str = "id";
    /// Sale date column (ISO `YYYY-MM-DD`)
    pub const DATE: &str = "date";
    /// Sale amount column
    pub const AMOUNT: &str = "amount";
    /// Product name column
    pub const PRODUCT: &str = "product";
    /// Region name column
    pub const REGION: &str = "region";
    /// Units sold column
    pub const QUANTITY: &str = "quantity";
    /// Customer segment column
    pub const CUSTOMER_TYPE: &str = "customer_type";

    /// DDL for the table
    pub const CREATE_TABLE_SQL: &str = "
        CREATE TABLE IF NOT EXISTS sales (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date DATE NOT NULL,
            amount DECIMAL(10, 2) NOT NULL,
            product VARCHAR(50) NOT NULL,
            region VARCHAR(20) NOT NULL,
            quantity INTEGER NOT NULL DEFAULT 1,
            customer_type VARCHAR(20) NOT NULL DEFAULT 'Regular'
        );
        CREATE INDEX IF NOT EXISTS idx_sales_date ON sales(date);
    ";

    /// Products known to the pattern rules and the seeder, with price ranges
    pub const PRODUCTS: &[(&str, f64, f64)] = &[
        ("Laptop", 800.0, 2500.0),
        ("Desktop", 600.0, 2000.0),
        ("Monitor", 150.0, 600.0),
        ("Keyboard", 20.0, 150.0),
        ("Mouse", 10.0, 100.0),
        ("Headphones", 30.0, 300.0),
        ("Webcam", 40.0, 200.0),
        ("Printer", 100.0, 500.0),
        ("Scanner", 80.0, 400.0),
        ("Tablet", 200.0, 1000.0),
        ("Smartphone", 300.0, 1500.0),
        ("Smartwatch", 150.0, 600.0),
        ("Speaker", 50.0, 400.0),
        ("Router", 40.0, 250.0),
        ("Cable", 5.0, 50.0),
    ];

    /// Regions known to the pattern rules and the seeder
    pub const REGIONS: &[&str] = &["North", "South", "East", "West"];

    /// Customer segments used by the seeder
    pub const CUSTOMER_TYPES: &[&str] = &["Regular", "Business", "Premium"];
}
