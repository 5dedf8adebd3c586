pub mod scoped_settings_test;
