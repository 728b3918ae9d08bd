mod test_device_stream;
