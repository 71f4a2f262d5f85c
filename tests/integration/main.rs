mod ingest_tests;
